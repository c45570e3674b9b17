use super::EncoderError;

const START_CODE_3: [u8; 3] = [0, 0, 1];
const START_CODE_4: [u8; 4] = [0, 0, 0, 1];

const NALU_TYPE_SPS: u8 = 7;
const NALU_TYPE_PPS: u8 = 8;

/// Splits an Annex B byte stream into individual NALUs (without start codes).
fn split_annexb_nalus(data: &[u8]) -> Vec<&[u8]> {
    let mut nalus = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let start = if data[i..].starts_with(&START_CODE_4) {
            i + 4
        } else if data[i..].starts_with(&START_CODE_3) {
            i + 3
        } else {
            i += 1;
            continue;
        };

        let mut end = data.len();
        let mut j = start;
        while j < data.len() {
            if data[j..].starts_with(&START_CODE_3) {
                // A 4-byte code matches [0, 0, 1] one byte in; the zero in
                // front belongs to the start code, not the NALU.
                end = if j > start && data[j - 1] == 0 { j - 1 } else { j };
                break;
            }
            j += 1;
        }

        if start < end {
            nalus.push(&data[start..end]);
        }
        i = end;
    }

    nalus
}

/// Converts Annex B coded-picture data to AVCC (4-byte length prefix per
/// NALU), written into `dst`. SPS and PPS are dropped from the picture
/// data; they travel in the decoder configuration record instead.
pub(super) fn annexb_to_avcc_into(data: &[u8], dst: &mut [u8]) -> Result<usize, EncoderError> {
    let mut written = 0;
    for nalu in split_annexb_nalus(data) {
        let nalu_type = nalu[0] & 0x1F;
        if nalu_type == NALU_TYPE_SPS || nalu_type == NALU_TYPE_PPS {
            continue;
        }
        let needed = written + 4 + nalu.len();
        if needed > dst.len() {
            return Err(EncoderError::PacketTooLarge(needed));
        }
        dst[written..written + 4].copy_from_slice(&(nalu.len() as u32).to_be_bytes());
        dst[written + 4..needed].copy_from_slice(nalu);
        written = needed;
    }
    Ok(written)
}

/// Builds an AVCDecoderConfigurationRecord from Annex B extradata carrying
/// the SPS and PPS, written into `dst`.
///
/// Layout:
/// - u8  configurationVersion = 1
/// - u8  AVCProfileIndication, u8 profile_compatibility, u8 AVCLevelIndication
///   (copied from SPS bytes 1..4)
/// - u8  lengthSizeMinusOne (0xFC | 3, 4-byte NALU lengths)
/// - u8  numOfSequenceParameterSets (0xE0 | count)
/// - per SPS: u16 length, SPS bytes
/// - u8  numOfPictureParameterSets
/// - per PPS: u16 length, PPS bytes
pub(super) fn write_decoder_config(extradata: &[u8], dst: &mut [u8]) -> Result<usize, EncoderError> {
    let nalus = split_annexb_nalus(extradata);
    let sps_list: Vec<&[u8]> = nalus
        .iter()
        .copied()
        .filter(|nalu| nalu[0] & 0x1F == NALU_TYPE_SPS)
        .collect();
    let pps_list: Vec<&[u8]> = nalus
        .iter()
        .copied()
        .filter(|nalu| nalu[0] & 0x1F == NALU_TYPE_PPS)
        .collect();

    let Some(sps) = sps_list.first() else {
        return Err(EncoderError::MissingHeaders);
    };
    if pps_list.is_empty() {
        return Err(EncoderError::MissingHeaders);
    }

    let mut cursor = Cursor { dst, written: 0 };
    cursor.put(&[1, sps[1], sps[2], sps[3], 0xFF])?;
    cursor.put(&[0xE0 | sps_list.len() as u8])?;
    for sps in &sps_list {
        cursor.put(&(sps.len() as u16).to_be_bytes())?;
        cursor.put(sps)?;
    }
    cursor.put(&[pps_list.len() as u8])?;
    for pps in &pps_list {
        cursor.put(&(pps.len() as u16).to_be_bytes())?;
        cursor.put(pps)?;
    }
    Ok(cursor.written)
}

struct Cursor<'a> {
    dst: &'a mut [u8],
    written: usize,
}

impl Cursor<'_> {
    fn put(&mut self, bytes: &[u8]) -> Result<(), EncoderError> {
        let end = self.written + bytes.len();
        if end > self.dst.len() {
            return Err(EncoderError::PacketTooLarge(end));
        }
        self.dst[self.written..end].copy_from_slice(bytes);
        self.written = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xD9, 0x00];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

    fn annexb(nalus: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nalu in nalus {
            out.extend_from_slice(&START_CODE_4);
            out.extend_from_slice(nalu);
        }
        out
    }

    #[test]
    fn decoder_config_layout() {
        let extradata = annexb(&[SPS, PPS]);
        let mut dst = [0u8; 64];
        let len = write_decoder_config(&extradata, &mut dst).unwrap();

        let mut expected = vec![0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1];
        expected.extend_from_slice(&(SPS.len() as u16).to_be_bytes());
        expected.extend_from_slice(SPS);
        expected.push(0x01);
        expected.extend_from_slice(&(PPS.len() as u16).to_be_bytes());
        expected.extend_from_slice(PPS);
        assert_eq!(&dst[..len], &expected[..]);
    }

    #[test]
    fn decoder_config_requires_both_headers() {
        let extradata = annexb(&[SPS]);
        let mut dst = [0u8; 64];
        assert!(matches!(
            write_decoder_config(&extradata, &mut dst),
            Err(EncoderError::MissingHeaders)
        ));
    }

    #[test]
    fn avcc_drops_parameter_sets_and_prefixes_lengths() {
        let idr = [0x65, 0xAA, 0xBB, 0xCC];
        let data = annexb(&[SPS, PPS, &idr]);
        let mut dst = [0u8; 64];
        let len = annexb_to_avcc_into(&data, &mut dst).unwrap();

        assert_eq!(len, 4 + idr.len());
        assert_eq!(&dst[..4], &(idr.len() as u32).to_be_bytes());
        assert_eq!(&dst[4..len], &idr);
    }

    #[test]
    fn split_keeps_boundaries_at_four_byte_codes() {
        // SPS ends in 0x00: the splitter may only consume the start code's
        // own zeros, never the NALU's trailing byte.
        let extradata = annexb(&[SPS, PPS]);
        assert_eq!(split_annexb_nalus(&extradata), vec![SPS, PPS]);
    }

    #[test]
    fn avcc_keeps_exact_lengths_between_four_byte_codes() {
        let first = [0x41, 0x01, 0x02];
        let second = [0x41, 0x03];
        let data = annexb(&[&first, &second]);
        let mut dst = [0u8; 32];
        let len = annexb_to_avcc_into(&data, &mut dst).unwrap();

        assert_eq!(len, 4 + first.len() + 4 + second.len());
        assert_eq!(&dst[..4], &(first.len() as u32).to_be_bytes());
        assert_eq!(&dst[4..7], &first);
        assert_eq!(&dst[7..11], &(second.len() as u32).to_be_bytes());
        assert_eq!(&dst[11..len], &second);
    }

    #[test]
    fn avcc_handles_three_byte_start_codes() {
        let nalu = [0x41, 0x01, 0x02];
        let mut data = START_CODE_3.to_vec();
        data.extend_from_slice(&nalu);
        let mut dst = [0u8; 16];
        let len = annexb_to_avcc_into(&data, &mut dst).unwrap();
        assert_eq!(&dst[4..len], &nalu);
    }

    #[test]
    fn avcc_rejects_overflow() {
        let data = annexb(&[&[0x65; 32]]);
        let mut dst = [0u8; 8];
        assert!(matches!(
            annexb_to_avcc_into(&data, &mut dst),
            Err(EncoderError::PacketTooLarge(_))
        ));
    }
}

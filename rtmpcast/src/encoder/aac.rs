use std::{
    os::raw::{c_int, c_void},
    ptr,
};

use fdk_aac_sys as fdk;
use tracing::info;

use crate::config::{AudioConfig, AudioProducer};

use super::{AudioFacade, EncoderError, ProduceError};

/// fdk-aac behind the audio facade contract. AAC-LC only, raw frames
/// without ADTS framing, because FLV carries the AudioSpecificConfig in
/// its own sequence header tag.
pub(crate) struct AacEncoder {
    handle: fdk::HANDLE_AACENCODER,
    input: Vec<i16>,
    asc: Vec<u8>,
    producer: AudioProducer,
}

impl AacEncoder {
    pub(crate) fn new(config: AudioConfig) -> Result<Self, EncoderError> {
        info!(
            sample_rate = config.sample_rate,
            channels = config.channels.count(),
            kbps = config.bitrate_kbps,
            "Initialize AAC encoder"
        );
        let channels = config.channels.count();
        let channel_mode = match channels {
            1 => fdk::CHANNEL_MODE_MODE_1,
            _ => fdk::CHANNEL_MODE_MODE_2,
        };

        let mut handle: fdk::HANDLE_AACENCODER = ptr::null_mut();
        check(unsafe { fdk::aacEncOpen(&mut handle, 0, channels) })?;

        // Parameter errors after open still run Drop and release the handle.
        let mut encoder = Self {
            handle,
            input: vec![0; (1024 * channels) as usize],
            asc: Vec::new(),
            producer: config.producer,
        };

        encoder.set_param(
            fdk::AACENC_PARAM_AACENC_AOT,
            fdk::AUDIO_OBJECT_TYPE_AOT_AAC_LC as u32,
        )?;
        encoder.set_param(fdk::AACENC_PARAM_AACENC_SAMPLERATE, config.sample_rate)?;
        encoder.set_param(fdk::AACENC_PARAM_AACENC_CHANNELMODE, channel_mode as u32)?;
        // MPEG channel order (L, R).
        encoder.set_param(fdk::AACENC_PARAM_AACENC_CHANNELORDER, 1)?;
        encoder.set_param(
            fdk::AACENC_PARAM_AACENC_BITRATE,
            config.bitrate_kbps * 1000,
        )?;
        encoder.set_param(
            fdk::AACENC_PARAM_AACENC_TRANSMUX,
            fdk::TRANSPORT_TYPE_TT_MP4_RAW as u32,
        )?;

        // A null encode call locks the configuration in.
        check(unsafe {
            fdk::aacEncEncode(
                encoder.handle,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
            )
        })?;

        let mut enc_info: fdk::AACENC_InfoStruct = unsafe { std::mem::zeroed() };
        check(unsafe { fdk::aacEncInfo(encoder.handle, &mut enc_info) })?;
        encoder.asc = enc_info.confBuf[..enc_info.confSize as usize].to_vec();

        Ok(encoder)
    }

    fn set_param(&mut self, param: fdk::AACENC_PARAM, value: u32) -> Result<(), EncoderError> {
        check(unsafe { fdk::aacEncoder_SetParam(self.handle, param, value) })
    }
}

impl AudioFacade for AacEncoder {
    fn sequence_header(&mut self, dst: &mut [u8]) -> Result<usize, EncoderError> {
        if self.asc.len() > dst.len() {
            return Err(EncoderError::PacketTooLarge(self.asc.len()));
        }
        dst[..self.asc.len()].copy_from_slice(&self.asc);
        Ok(self.asc.len())
    }

    fn produce(&mut self, dst: &mut [u8]) -> Result<usize, ProduceError> {
        let filled = (self.producer)(&mut self.input)?.min(self.input.len());

        let mut in_ptr = self.input.as_mut_ptr().cast::<c_void>();
        let mut in_id = fdk::AACENC_BufferIdentifier_IN_AUDIO_DATA as c_int;
        let mut in_size = (filled * size_of::<i16>()) as c_int;
        let mut in_el_size = size_of::<i16>() as c_int;
        let in_desc = fdk::AACENC_BufDesc {
            numBufs: 1,
            bufs: &mut in_ptr,
            bufferIdentifiers: &mut in_id,
            bufSizes: &mut in_size,
            bufElSizes: &mut in_el_size,
        };

        let mut out_ptr = dst.as_mut_ptr().cast::<c_void>();
        let mut out_id = fdk::AACENC_BufferIdentifier_OUT_BITSTREAM_DATA as c_int;
        let mut out_size = dst.len() as c_int;
        let mut out_el_size: c_int = 1;
        let out_desc = fdk::AACENC_BufDesc {
            numBufs: 1,
            bufs: &mut out_ptr,
            bufferIdentifiers: &mut out_id,
            bufSizes: &mut out_size,
            bufElSizes: &mut out_el_size,
        };

        let in_args = fdk::AACENC_InArgs {
            numInSamples: filled as c_int,
            numAncBytes: 0,
        };
        let mut out_args: fdk::AACENC_OutArgs = unsafe { std::mem::zeroed() };

        check(unsafe {
            fdk::aacEncEncode(self.handle, &in_desc, &out_desc, &in_args, &mut out_args)
        })
        .map_err(ProduceError::Encoder)?;

        Ok(out_args.numOutBytes as usize)
    }
}

impl Drop for AacEncoder {
    fn drop(&mut self) {
        unsafe {
            fdk::aacEncClose(&mut self.handle);
        }
    }
}

fn check(code: fdk::AACENC_ERROR) -> Result<(), EncoderError> {
    if code == fdk::AACENC_ERROR_AACENC_OK {
        Ok(())
    } else {
        Err(EncoderError::FdkAac(code))
    }
}

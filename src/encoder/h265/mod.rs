//! H.265/HEVC packed header generation.
//!
//! This module derives the parameter sets of a stream once, then for each
//! picture classifies it, builds its reference picture set, slice header and
//! SEI, and hands the hardware-facing records back to the caller. The packed
//! headers are emitted through an [`AccessUnitPacker`].

pub mod classify;
pub mod hw;
pub mod packer;
pub mod params;
pub mod rps;
pub mod sei;
pub mod slice;
pub mod syntax;
pub mod writer;

use std::sync::Arc;

use tracing::debug;

use crate::encoder::picture::EncodedPicture;
use crate::encoder::{Codec, EncodeConfig, HeaderGenerator, PictureSetup, SeiFlags};
use crate::error::Result;

use classify::StreamState;
use hw::{PictureParams, SequenceParams};
use packer::AccessUnitPacker;
use params::ParameterState;
use syntax::ReferencePictureSet;
use writer::{AnnexBWriter, NalSerializer};

/// H.265 Coding Tree Block (CTB) size in pixels.
pub const CTB_SIZE: u32 = 32;

/// H.265 header generator.
pub struct H265HeaderGenerator<S: NalSerializer = AnnexBWriter> {
    params: Arc<ParameterState>,
    sei: SeiFlags,
    stream: StreamState,
    packer: AccessUnitPacker<S>,
}

impl H265HeaderGenerator {
    /// Create a generator writing Annex B byte streams.
    pub fn new(config: &EncodeConfig) -> Result<Self> {
        let params = Arc::new(ParameterState::derive(config)?);
        let serializer = AnnexBWriter::with_parameter_sets(params.sps.clone(), params.pps.clone());
        Ok(Self::from_parts(config, params, serializer))
    }
}

impl<S: NalSerializer> H265HeaderGenerator<S> {
    /// Create a generator that emits through a custom serializer.
    pub fn with_serializer(config: &EncodeConfig, serializer: S) -> Result<Self> {
        let params = Arc::new(ParameterState::derive(config)?);
        Ok(Self::from_parts(config, params, serializer))
    }

    fn from_parts(config: &EncodeConfig, params: Arc<ParameterState>, serializer: S) -> Self {
        Self {
            packer: AccessUnitPacker::new(serializer, Arc::clone(&params), config.aud),
            params,
            sei: config.sei,
            stream: StreamState::new(),
        }
    }

    /// Derived parameter state shared by every picture.
    pub fn parameters(&self) -> &Arc<ParameterState> {
        &self.params
    }

    /// Sequence record for the driver.
    pub fn sequence_params(&self) -> &SequenceParams {
        &self.params.sequence_params
    }
}

impl<S: NalSerializer> HeaderGenerator for H265HeaderGenerator<S> {
    fn codec(&self) -> Codec {
        Codec::H265
    }

    fn begin_picture(
        &mut self,
        picture: &EncodedPicture,
        live: &[EncodedPicture],
    ) -> Result<PictureSetup> {
        // Commit the stream state only once the whole picture is accepted.
        let mut stream = self.stream.clone();
        let class = stream.classify(picture)?;

        let rps = if class.picture_type.is_idr() {
            ReferencePictureSet::default()
        } else {
            rps::build_reference_picture_set(picture, live, self.params.max_rps_entries())?
        };
        let slice_header = slice::build_slice_header(&self.params, &class, rps)?;
        let picture_params = PictureParams::derive(&self.params, picture, &class)?;
        let slice_params = slice::build_slice_params(&self.params, &slice_header, &picture_params);
        let messages = sei::compose_sei(self.sei, &class, &picture.side_data);

        debug!(
            "Begin picture {} ({:?}), {} SEI message(s)",
            picture.encode_order,
            class.nal_unit_type,
            messages.len()
        );

        self.packer.begin_picture(&class, slice_header, messages);
        self.stream = stream;

        Ok(PictureSetup {
            picture: picture_params,
            slice: slice_params,
        })
    }

    fn write_sequence_header(&mut self, out: &mut [u8]) -> Result<usize> {
        self.packer.write_sequence_header(out)
    }

    fn write_slice_header(&mut self, out: &mut [u8]) -> Result<usize> {
        self.packer.write_slice_header(out)
    }

    fn write_extra_header(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        self.packer.write_extra_header(out)
    }
}

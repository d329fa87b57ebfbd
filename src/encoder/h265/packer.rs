//! Access unit assembly.
//!
//! The packer owns the per-picture emission state: which picture is current,
//! whether its access unit delimiter is still pending and whether its SEI has
//! been written. Every emission is serialized completely before anything is
//! copied out, so a buffer that is too small leaves both the buffer and the
//! state untouched.

use std::sync::Arc;

use tracing::debug;

use super::classify::PictureClass;
use super::params::ParameterState;
use super::syntax::{Aud, NalUnit, SeiMessage, SliceHeader};
use super::writer::{AnnexBWriter, NalSerializer};
use crate::encoder::picture::PictureType;
use crate::error::{HevcError, Result};

/// Emission state of the current picture.
#[derive(Debug, Clone)]
struct PendingPicture {
    picture_type: PictureType,
    aud: Aud,
    aud_needed: bool,
    slice: SliceHeader,
    slice_written: bool,
    sei: Vec<SeiMessage>,
}

/// Orders the NAL units of each access unit and drives the serializer.
pub struct AccessUnitPacker<S: NalSerializer = AnnexBWriter> {
    serializer: S,
    params: Arc<ParameterState>,
    aud_enabled: bool,
    current: Option<PendingPicture>,
}

impl<S: NalSerializer> AccessUnitPacker<S> {
    pub fn new(serializer: S, params: Arc<ParameterState>, aud_enabled: bool) -> Self {
        Self {
            serializer,
            params,
            aud_enabled,
            current: None,
        }
    }

    /// Start the access unit of a new picture.
    pub fn begin_picture(&mut self, class: &PictureClass, slice: SliceHeader, sei: Vec<SeiMessage>) {
        self.current = Some(PendingPicture {
            picture_type: class.picture_type,
            aud: Aud {
                pic_type: class.aud_pic_type,
            },
            aud_needed: self.aud_enabled,
            slice,
            slice_written: false,
            sei,
        });
    }

    /// Whether the current picture still owes its access unit delimiter.
    pub fn aud_pending(&self) -> bool {
        self.current.as_ref().is_some_and(|p| p.aud_needed)
    }

    /// Write VPS, SPS and PPS, preceded by the AUD when it is pending.
    ///
    /// Allowed before the first picture (stream headers) and for IDR pictures.
    pub fn write_sequence_header(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut units = Vec::with_capacity(4);
        if let Some(pending) = &self.current {
            if pending.picture_type != PictureType::Idr {
                return Err(HevcError::Precondition(format!(
                    "parameter sets are only emitted with IDR pictures, current is {:?}",
                    pending.picture_type
                )));
            }
            if pending.aud_needed {
                units.push(NalUnit::Aud(pending.aud));
            }
        }
        units.push(NalUnit::Vps(self.params.vps.clone()));
        units.push(NalUnit::Sps(self.params.sps.clone()));
        units.push(NalUnit::Pps(self.params.pps.clone()));

        let bits = self.emit(&units, out)?;
        self.aud_written();
        Ok(bits)
    }

    /// Write the slice header of the current picture.
    pub fn write_slice_header(&mut self, out: &mut [u8]) -> Result<usize> {
        let pending = self.current.as_ref().ok_or_else(|| {
            HevcError::Precondition("no picture has been started".to_string())
        })?;
        let mut units = Vec::with_capacity(2);
        if pending.aud_needed {
            units.push(NalUnit::Aud(pending.aud));
        }
        units.push(NalUnit::Slice(pending.slice.clone()));

        let bits = self.emit(&units, out)?;
        self.aud_written();
        if let Some(pending) = self.current.as_mut() {
            pending.slice_written = true;
        }
        Ok(bits)
    }

    /// Write the SEI of the current picture; `None` when there is none left.
    ///
    /// Prefix SEI precedes the slice, so pending SEI can no longer be written
    /// once the slice header of the picture has been emitted.
    pub fn write_extra_header(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        let Some(pending) = self.current.as_ref() else {
            return Ok(None);
        };
        if pending.sei.is_empty() {
            return Ok(None);
        }
        if pending.slice_written {
            return Err(HevcError::Precondition(format!(
                "{} SEI message(s) requested after the slice header",
                pending.sei.len()
            )));
        }
        let mut units = Vec::with_capacity(2);
        if pending.aud_needed {
            units.push(NalUnit::Aud(pending.aud));
        }
        units.push(NalUnit::Sei(pending.sei.clone()));

        let bits = self.emit(&units, out)?;
        self.aud_written();
        if let Some(pending) = self.current.as_mut() {
            pending.sei.clear();
        }
        Ok(Some(bits))
    }

    fn aud_written(&mut self) {
        if let Some(pending) = self.current.as_mut() {
            pending.aud_needed = false;
        }
    }

    fn emit(&mut self, units: &[NalUnit], out: &mut [u8]) -> Result<usize> {
        let fragment = self.serializer.write_fragment(units)?;
        let required_bits = fragment.bit_len();
        let available_bits = out.len() * 8;
        if required_bits > available_bits || fragment.data.len() > out.len() {
            return Err(HevcError::Capacity {
                required_bits,
                available_bits,
            });
        }
        out[..fragment.data.len()].copy_from_slice(&fragment.data);
        debug!(
            "Packed {} NAL unit(s) starting with {:?}: {} bits",
            units.len(),
            units.first().map(NalUnit::nal_unit_type),
            required_bits
        );
        Ok(required_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::h265::classify::StreamState;
    use crate::encoder::h265::slice::build_slice_header;
    use crate::encoder::h265::syntax::{ContentLightLevelInfo, NalUnitType, ReferencePictureSet};
    use crate::encoder::h265::writer::SerializedFragment;
    use crate::encoder::picture::{EncodedPicture, SurfaceId};
    use crate::encoder::EncodeConfig;
    use std::sync::Mutex;

    const AUD_BYTES: [u8; 7] = [0, 0, 0, 1, 0x46, 0x01, 0x10];

    fn params() -> Arc<ParameterState> {
        Arc::new(ParameterState::derive(&EncodeConfig::h265(640, 480).with_aud(true)).unwrap())
    }

    fn cll() -> Vec<SeiMessage> {
        vec![SeiMessage::ContentLightLevelInfo(ContentLightLevelInfo {
            max_content_light_level: 1000,
            max_pic_average_light_level: 400,
        })]
    }

    fn begin<S: NalSerializer>(
        packer: &mut AccessUnitPacker<S>,
        stream: &mut StreamState,
        picture: &EncodedPicture,
        sei: Vec<SeiMessage>,
    ) {
        let class = stream.classify(picture).unwrap();
        let rps = if picture.picture_type.is_idr() {
            ReferencePictureSet::default()
        } else {
            ReferencePictureSet {
                negative: vec![crate::encoder::h265::syntax::RpsEntry {
                    delta_poc_minus1: 0,
                    used_by_curr_pic: true,
                }],
                positive: vec![],
            }
        };
        let slice = build_slice_header(&packer.params, &class, rps).unwrap();
        packer.begin_picture(&class, slice, sei);
    }

    fn idr() -> EncodedPicture {
        EncodedPicture::new(0, 0, PictureType::Idr, SurfaceId(0))
    }

    #[test]
    fn test_aud_once_per_access_unit() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, true);
        let mut stream = StreamState::new();
        begin(&mut packer, &mut stream, &idr(), cll());

        let mut buf = vec![0u8; 4096];
        let bits = packer.write_sequence_header(&mut buf).unwrap();
        assert_eq!(&buf[..7], &AUD_BYTES);
        assert_eq!(bits % 8, 0);
        assert!(!packer.aud_pending());

        let mut buf = vec![0u8; 4096];
        let bits = packer.write_extra_header(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..6], &[0, 0, 0, 1, 0x4e, 0x01]);
        // start code, header, type, size, 4 payload bytes, trailing bits
        assert_eq!(bits, (4 + 2 + 2 + 4 + 1) * 8);

        let mut buf = vec![0u8; 4096];
        packer.write_slice_header(&mut buf).unwrap();
        // Slice NAL directly, with a 4-byte start code as first unit.
        assert_eq!(&buf[..6], &[0, 0, 0, 1, 0x26, 0x01]);
    }

    #[test]
    fn test_sei_refused_after_slice_header() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, false);
        let mut stream = StreamState::new();
        let first = idr();
        begin(&mut packer, &mut stream, &first, cll());

        let mut buf = vec![0u8; 4096];
        packer.write_slice_header(&mut buf).unwrap();
        assert!(matches!(
            packer.write_extra_header(&mut buf),
            Err(HevcError::Precondition(_))
        ));

        // The next picture starts a new access unit.
        let p = EncodedPicture::new(1, 1, PictureType::P, SurfaceId(1)).with_reference(&first);
        begin(&mut packer, &mut stream, &p, cll());
        assert!(packer.write_extra_header(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_aud_carried_by_slice_when_first() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, true);
        let mut stream = StreamState::new();
        let first = idr();
        begin(&mut packer, &mut stream, &first, Vec::new());
        let mut buf = vec![0u8; 4096];
        packer.write_sequence_header(&mut buf).unwrap();
        packer.write_slice_header(&mut buf).unwrap();

        let p = EncodedPicture::new(1, 1, PictureType::P, SurfaceId(1)).with_reference(&first);
        begin(&mut packer, &mut stream, &p, Vec::new());
        assert!(packer.aud_pending());
        packer.write_slice_header(&mut buf).unwrap();
        // AUD with pic_type 1, then the slice with a 3-byte start code.
        assert_eq!(&buf[..7], &[0, 0, 0, 1, 0x46, 0x01, 0x30]);
        assert_eq!(&buf[7..12], &[0, 0, 1, 0x02, 0x01]);

        // A second slice header emission of the same picture has no AUD.
        packer.write_slice_header(&mut buf).unwrap();
        assert_eq!(&buf[..6], &[0, 0, 0, 1, 0x02, 0x01]);
    }

    #[test]
    fn test_no_aud_when_disabled() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, false);
        let mut stream = StreamState::new();
        begin(&mut packer, &mut stream, &idr(), Vec::new());
        assert!(!packer.aud_pending());

        let mut buf = vec![0u8; 4096];
        packer.write_sequence_header(&mut buf).unwrap();
        assert_eq!(&buf[..6], &[0, 0, 0, 1, 0x40, 0x01]);
    }

    #[test]
    fn test_capacity_error_leaves_state_and_buffer() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, true);
        let mut stream = StreamState::new();
        begin(&mut packer, &mut stream, &idr(), Vec::new());

        let mut small = [0xAAu8; 8];
        let err = packer.write_sequence_header(&mut small).unwrap_err();
        match err {
            HevcError::Capacity {
                required_bits,
                available_bits,
            } => {
                assert!(required_bits > 64);
                assert_eq!(available_bits, 64);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(small, [0xAA; 8]);
        assert!(packer.aud_pending());

        // Retrying with enough room still carries the AUD.
        let mut buf = vec![0u8; 4096];
        packer.write_sequence_header(&mut buf).unwrap();
        assert_eq!(&buf[..7], &AUD_BYTES);
    }

    #[test]
    fn test_extra_header_is_consumed() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, false);
        let mut stream = StreamState::new();
        begin(&mut packer, &mut stream, &idr(), cll());

        let mut buf = vec![0u8; 4096];
        assert!(packer.write_extra_header(&mut buf).unwrap().is_some());
        assert_eq!(packer.write_extra_header(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_extra_header_capacity_keeps_sei() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, false);
        let mut stream = StreamState::new();
        begin(&mut packer, &mut stream, &idr(), cll());

        let mut small = [0u8; 4];
        assert!(matches!(
            packer.write_extra_header(&mut small),
            Err(HevcError::Capacity { .. })
        ));
        let mut buf = vec![0u8; 4096];
        assert!(packer.write_extra_header(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_extra_header_without_sei() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, true);
        let mut buf = vec![0u8; 64];
        // No picture yet.
        assert_eq!(packer.write_extra_header(&mut buf).unwrap(), None);

        let mut stream = StreamState::new();
        begin(&mut packer, &mut stream, &idr(), Vec::new());
        assert_eq!(packer.write_extra_header(&mut buf).unwrap(), None);
        // The AUD is still owed to the next emission.
        assert!(packer.aud_pending());
    }

    #[test]
    fn test_slice_before_picture_is_rejected() {
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params(), false);
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            packer.write_slice_header(&mut buf),
            Err(HevcError::Precondition(_))
        ));
    }

    #[test]
    fn test_sequence_header_only_for_idr() {
        let params = params();
        let mut packer = AccessUnitPacker::new(AnnexBWriter::new(), params, false);
        let mut buf = vec![0u8; 4096];
        // Stream headers before the first picture.
        assert!(packer.write_sequence_header(&mut buf).is_ok());

        let mut stream = StreamState::new();
        let first = idr();
        begin(&mut packer, &mut stream, &first, Vec::new());
        let p = EncodedPicture::new(1, 1, PictureType::P, SurfaceId(1)).with_reference(&first);
        begin(&mut packer, &mut stream, &p, Vec::new());
        assert!(matches!(
            packer.write_sequence_header(&mut buf),
            Err(HevcError::Precondition(_))
        ));
    }

    /// Records what it is asked to serialize.
    #[derive(Default)]
    struct RecordingSerializer {
        calls: Arc<Mutex<Vec<Vec<NalUnitType>>>>,
    }

    impl NalSerializer for RecordingSerializer {
        fn write_fragment(&mut self, units: &[NalUnit]) -> Result<SerializedFragment> {
            self.calls
                .lock()
                .unwrap()
                .push(units.iter().map(NalUnit::nal_unit_type).collect());
            Ok(SerializedFragment {
                data: vec![0xFF; 2],
                padding_bits: 3,
            })
        }
    }

    #[test]
    fn test_serializer_seam_and_padding() {
        let serializer = RecordingSerializer::default();
        let calls = Arc::clone(&serializer.calls);
        let mut packer = AccessUnitPacker::new(serializer, params(), true);
        let mut stream = StreamState::new();
        begin(&mut packer, &mut stream, &idr(), cll());

        let mut buf = [0u8; 2];
        assert_eq!(packer.write_extra_header(&mut buf).unwrap(), Some(13));
        assert_eq!(packer.write_slice_header(&mut buf).unwrap(), 13);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                vec![NalUnitType::Aud, NalUnitType::PrefixSei],
                vec![NalUnitType::IdrWRadl],
            ]
        );
    }
}

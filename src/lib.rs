//! # pixelforge-hevc
//!
//! High-level syntax generation for hardware HEVC encoders.
//!
//! The hardware produces slice data; this crate produces everything around it:
//! the VPS/SPS/PPS parameter sets, one slice header per picture (including its
//! short-term reference picture set), HDR SEI metadata on key frames and the
//! optional access unit delimiter. Headers are packed into caller-owned buffers
//! and reported by exact bit length, which is what packed-header interfaces of
//! hardware encoders expect.
//!
//! ```no_run
//! use pixelforge_hevc::{create_header_generator, EncodeConfig, GopScheduler};
//!
//! # fn main() -> pixelforge_hevc::Result<()> {
//! let config = EncodeConfig::h265(1920, 1080).with_b_frames(2).with_aud(true);
//! let mut generator = create_header_generator(&config)?;
//!
//! let scheduler = GopScheduler::new(config.gop_size, config.b_frame_count, 0);
//! let plan = scheduler.plan(8);
//! let mut buffer = vec![0u8; 4096];
//! for (position, picture) in plan.iter().enumerate() {
//!     let window = scheduler.live_window(&plan, position);
//!     let _setup = generator.begin_picture(picture, &window)?;
//!     if picture.picture_type.is_idr() {
//!         let _bits = generator.write_sequence_header(&mut buffer)?;
//!     }
//!     let _sei_bits = generator.write_extra_header(&mut buffer)?;
//!     let _bits = generator.write_slice_header(&mut buffer)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod encoder;
pub mod error;

pub use encoder::gop::GopScheduler;
pub use encoder::h265::hw::{PictureParams, SequenceParams, SliceParams};
pub use encoder::h265::H265HeaderGenerator;
pub use encoder::picture::{
    ContentLightMetadata, EncodedPicture, FrameSideData, MasteringDisplayMetadata, PictureType,
    ReferenceInfo, SurfaceId,
};
pub use encoder::{
    create_header_generator, ChromaLocation, Codec, ColorRange, Dimensions, EncodeConfig,
    HeaderGenerator, PictureSetup, PixelFormat, RateControlMode, Rational, SeiFlags,
};
pub use error::{HevcError, Result};

//! Reference GOP scheduling.
//!
//! The header generator never decides picture types or references itself; it
//! reads them from the pictures it is handed. This scheduler produces such
//! pictures for simple IPB structures, together with the live window the
//! reference picture set builder scans.

use tracing::debug;

use crate::encoder::picture::{EncodedPicture, PictureType, SurfaceId};

/// Fixed GOP planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GopScheduler {
    /// Number of pictures in each GOP.
    gop_size: u32,
    /// Number of B pictures between anchors.
    b_frame_count: u32,
    /// Display distance between IDR pictures (0 means only the first).
    idr_period: u32,
}

impl GopScheduler {
    /// Create a new scheduler.
    ///
    /// # Arguments
    /// * `gop_size` - Number of pictures in each GOP; the first is an intra picture.
    /// * `b_frame_count` - Number of B pictures between anchors (0 for I-P only).
    /// * `idr_period` - Period between IDR pictures (0 means only the first picture is IDR,
    ///   later GOPs start with a CRA picture).
    pub fn new(gop_size: u32, b_frame_count: u32, idr_period: u32) -> Self {
        Self {
            gop_size: gop_size.max(1),
            b_frame_count,
            idr_period,
        }
    }

    /// Create a simple I-P scheduler with an IDR at every GOP start.
    pub fn new_ip_only(gop_size: u32) -> Self {
        Self::new(gop_size, 0, gop_size)
    }

    /// Picture type by display position, before B runs are resolved.
    fn nominal_type(&self, display: u64) -> PictureType {
        let gop_pos = display % u64::from(self.gop_size);
        if gop_pos == 0 {
            let idr = display == 0
                || (self.idr_period > 0 && display.is_multiple_of(u64::from(self.idr_period)));
            if idr {
                PictureType::Idr
            } else {
                PictureType::I
            }
        } else if self.b_frame_count == 0
            || gop_pos.is_multiple_of(u64::from(self.b_frame_count) + 1)
        {
            PictureType::P
        } else {
            PictureType::B
        }
    }

    /// Picture types of the first `count` pictures in display order.
    ///
    /// A B run can only be coded when a later non-IDR anchor exists to predict
    /// from; runs at the end of the plan or right before an IDR are coded as a
    /// chain of P pictures instead.
    pub fn display_types(&self, count: u64) -> Vec<PictureType> {
        let mut types: Vec<PictureType> = (0..count).map(|d| self.nominal_type(d)).collect();

        let mut run_start = None;
        for d in 0..types.len() {
            match (types[d], run_start) {
                (PictureType::B, None) => run_start = Some(d),
                (PictureType::B, Some(_)) => {}
                (anchor, Some(start)) => {
                    if anchor.is_idr() {
                        types[start..d].fill(PictureType::P);
                    }
                    run_start = None;
                }
                (_, None) => {}
            }
        }
        if let Some(start) = run_start {
            types[start..].fill(PictureType::P);
        }
        types
    }

    /// Plan the first `count` pictures, returned in encode order.
    ///
    /// Each anchor is coded before the B run that precedes it in display
    /// order. P pictures reference the previous anchor; B pictures reference
    /// the previous and the next anchor. Reconstructed surfaces are numbered by
    /// encode order.
    pub fn plan(&self, count: u64) -> Vec<EncodedPicture> {
        let types = self.display_types(count);

        // Display positions in encode order.
        let mut coding_order = Vec::with_capacity(types.len());
        let mut pending_b = Vec::new();
        for (d, picture_type) in types.iter().enumerate() {
            if *picture_type == PictureType::B {
                pending_b.push(d);
            } else {
                coding_order.push(d);
                coding_order.append(&mut pending_b);
            }
        }

        let mut encode_of = vec![0u64; types.len()];
        for (encode, &display) in coding_order.iter().enumerate() {
            encode_of[display] = encode as u64;
        }

        let base: Vec<EncodedPicture> = types
            .iter()
            .enumerate()
            .map(|(d, &picture_type)| {
                let encode = encode_of[d];
                EncodedPicture::new(d as u64, encode, picture_type, SurfaceId(encode as u32))
            })
            .collect();

        // Reference displays by display position.
        let mut references: Vec<Vec<usize>> = vec![Vec::new(); types.len()];
        let mut previous_anchor: Option<usize> = None;
        for (d, picture_type) in types.iter().enumerate() {
            match picture_type {
                PictureType::Idr | PictureType::I => previous_anchor = Some(d),
                PictureType::P => {
                    references[d].extend(previous_anchor);
                    previous_anchor = Some(d);
                }
                PictureType::B => {
                    let next_anchor = (d + 1..types.len()).find(|&n| types[n] != PictureType::B);
                    references[d].extend(previous_anchor);
                    references[d].extend(next_anchor);
                }
            }
        }

        let plan: Vec<EncodedPicture> = coding_order
            .iter()
            .map(|&d| {
                let mut picture = base[d].clone();
                picture.refs = references[d].iter().map(|&r| base[r].as_reference()).collect();
                picture
            })
            .collect();

        debug!(
            "Planned {} pictures (GOP {}, {} B, IDR period {})",
            plan.len(),
            self.gop_size,
            self.b_frame_count,
            self.idr_period
        );
        plan
    }

    /// Live window for the picture at `position` in an encode-ordered plan.
    ///
    /// The window holds the pending pictures up to one anchor and its B run
    /// ahead, plus every earlier picture that one of them still references,
    /// ordered by encode order.
    pub fn live_window(&self, plan: &[EncodedPicture], position: usize) -> Vec<EncodedPicture> {
        let horizon = position.saturating_add(self.b_frame_count as usize + 1);
        let pending = plan
            .get(position..=horizon.min(plan.len().saturating_sub(1)))
            .unwrap_or_default();

        plan.iter()
            .enumerate()
            .filter(|(index, picture)| {
                if *index >= position {
                    return *index <= horizon;
                }
                pending
                    .iter()
                    .any(|later| later.references(picture.encode_order))
            })
            .map(|(_, picture)| picture.clone())
            .collect()
    }
}

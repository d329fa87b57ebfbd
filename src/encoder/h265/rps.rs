//! Short-term reference picture set construction.
//!
//! The RPS of a picture lists every earlier-coded picture that must stay in the
//! decoded picture buffer: the pictures it predicts from, plus pictures that a
//! later B picture still needs and that would otherwise be dropped at this
//! picture. The live window comes from the scheduler; this module only decides
//! which of its pictures belong in the set and how they are coded.

use tracing::debug;

use super::syntax::{ReferencePictureSet, RpsEntry};
use crate::encoder::picture::EncodedPicture;
use crate::error::{HevcError, Result};

/// Build the reference picture set of `current`.
///
/// `live` is the scheduler's window ordered by encode order. At most
/// `max_entries` pictures may be listed; exceeding it, or two retained pictures
/// at the same display distance on the same side, is a configuration error.
pub fn build_reference_picture_set(
    current: &EncodedPicture,
    live: &[EncodedPicture],
    max_entries: usize,
) -> Result<ReferencePictureSet> {
    // (distance, used_by_curr_pic)
    let mut negative: Vec<(u64, bool)> = Vec::new();
    let mut positive: Vec<(u64, bool)> = Vec::new();

    for st in live
        .iter()
        .filter(|st| st.encode_order < current.encode_order)
    {
        let used = current.references(st.encode_order);
        if !used {
            // Keep `st` only for a pending B picture that predicts from it and
            // from the current picture.
            let needed_later = live.iter().any(|rp| {
                rp.encode_order >= current.encode_order
                    && rp.references_exactly(st.encode_order, current.encode_order)
            });
            if !needed_later {
                continue;
            }
        }

        if st.display_order < current.display_order {
            negative.push((current.display_order - st.display_order, used));
        } else if st.display_order > current.display_order {
            positive.push((st.display_order - current.display_order, used));
        } else {
            return Err(HevcError::Configuration(format!(
                "pictures {} and {} share display order {}",
                st.encode_order, current.encode_order, st.display_order
            )));
        }
    }

    let total = negative.len() + positive.len();
    if total > max_entries {
        return Err(HevcError::Configuration(format!(
            "reference picture set of picture {} needs {} entries, at most {} allowed",
            current.encode_order, total, max_entries
        )));
    }

    let rps = ReferencePictureSet {
        negative: encode_deltas(negative, current)?,
        positive: encode_deltas(positive, current)?,
    };
    debug!(
        "RPS for picture {} (display {}): deltas {:?}",
        current.encode_order,
        current.display_order,
        rps.delta_pocs()
    );
    Ok(rps)
}

/// Sort by distance and code each entry relative to the previous one.
fn encode_deltas(mut entries: Vec<(u64, bool)>, current: &EncodedPicture) -> Result<Vec<RpsEntry>> {
    entries.sort_by_key(|&(distance, _)| distance);

    let mut previous = 0u64;
    let mut coded = Vec::with_capacity(entries.len());
    for (distance, used) in entries {
        if distance == previous {
            return Err(HevcError::Configuration(format!(
                "two references at distance {} from picture {}",
                distance, current.encode_order
            )));
        }
        let delta_poc_minus1 = u32::try_from(distance - previous - 1).map_err(|_| {
            HevcError::Configuration(format!(
                "reference distance {} from picture {} is too large",
                distance, current.encode_order
            ))
        })?;
        coded.push(RpsEntry {
            delta_poc_minus1,
            used_by_curr_pic: used,
        });
        previous = distance;
    }
    Ok(coded)
}

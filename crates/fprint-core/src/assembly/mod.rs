//! Frame-assembly engine (§4.7) — turns a sequence of small, overlapping
//! swipe-sensor stripes into one tall `Image`. Two independent strategies
//! coexist, named per the open question in §9 rather than overloaded on one
//! entry point: [`overlap`] (older AuthenTec-style sensors) and [`motion`]
//! (newer sensors reporting or estimating per-stripe motion).

pub mod motion;
pub mod overlap;

use crate::error::{Error, RetryHint, Result};

/// One raw frame from a swipe sensor (§3's Stripe entity). `delta_x`/`delta_y`
/// are only meaningful to [`motion`]; [`overlap`] ignores them and derives
/// its own displacement via search.
#[derive(Debug, Clone)]
pub struct Stripe {
    pub delta_x: i32,
    pub delta_y: i32,
    pub pixels: Vec<u8>,
}

impl Stripe {
    pub fn new(pixels: Vec<u8>) -> Self {
        Stripe {
            delta_x: 0,
            delta_y: 0,
            pixels,
        }
    }

    pub fn with_motion(pixels: Vec<u8>, delta_x: i32, delta_y: i32) -> Self {
        Stripe {
            delta_x,
            delta_y,
            pixels,
        }
    }
}

/// Policy knobs every driver configures when handing its stripe queue to
/// the assembler (§4.7's "policy details").
#[derive(Debug, Clone, Copy)]
pub struct AssemblyPolicy {
    /// Trailing stripes to discard before assembling — frames captured as
    /// the finger lifts are unreliable. Typically 1.
    pub drop_last: usize,
    /// Minimum stripes required after dropping trailing frames; fewer than
    /// this at finger-off yields `RetryScan(TooShort)` and no image.
    pub min_frames: usize,
    /// Stop accumulating and assemble once this many stripes are queued.
    pub max_frames: usize,
}

impl Default for AssemblyPolicy {
    fn default() -> Self {
        AssemblyPolicy {
            drop_last: 1,
            min_frames: 3,
            max_frames: 200,
        }
    }
}

/// Applies `drop_last` and the `min_frames` floor shared by both
/// strategies. Returns the usable stripe slice, or a `RetryScan` error if
/// too few stripes remain.
fn prepare<'a>(stripes: &'a [Stripe], policy: &AssemblyPolicy) -> Result<&'a [Stripe]> {
    let usable_len = stripes.len().saturating_sub(policy.drop_last);
    if usable_len < policy.min_frames {
        return Err(Error::RetryScan(RetryHint::TooShort));
    }
    Ok(&stripes[..usable_len])
}

/// Truncates to `max_frames` if the queue has grown past the cap, per
/// §4.7's "stop capture and assemble what we have".
pub fn cap_to_max_frames(stripes: &mut Vec<Stripe>, policy: &AssemblyPolicy) -> bool {
    if stripes.len() > policy.max_frames {
        stripes.truncate(policy.max_frames);
        true
    } else {
        false
    }
}

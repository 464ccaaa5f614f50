//! Sound backend seam
//!
//! A sound backend owns the device and hands every block of interleaved
//! samples to an injected [`AudioCallback`]. The router and the directory
//! do not depend on this module.

/// Processes one block of interleaved 16-bit samples in place
pub trait AudioCallback: Send {
    fn process(&mut self, samples: &mut [i16]);
}

impl<F> AudioCallback for F
where
    F: FnMut(&mut [i16]) + Send,
{
    fn process(&mut self, samples: &mut [i16]) {
        self(samples)
    }
}

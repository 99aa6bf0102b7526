//! Sample accumulation for a new identity.

use facelock_core::{Descriptor, MatchError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentProgress {
    pub name: String,
    pub collected: usize,
    pub required: usize,
}

impl EnrollmentProgress {
    /// Completion in [0,1].
    pub fn fraction(&self) -> f32 {
        if self.required == 0 {
            1.0
        } else {
            (self.collected as f32 / self.required as f32).min(1.0)
        }
    }
}

/// Descriptors collected so far for one enrollment. Lives for one session at most.
///
/// Every sample must have the same length as the first one, or as the
/// dimension fixed up front with [`RegistrationAccumulator::with_dimension`].
#[derive(Debug, Clone)]
pub struct RegistrationAccumulator {
    name: String,
    descriptors: Vec<Descriptor>,
    required: usize,
    dimension: Option<usize>,
}

impl RegistrationAccumulator {
    pub fn new(name: impl Into<String>, required: usize) -> Self {
        let required = required.max(1);
        Self {
            name: name.into(),
            descriptors: Vec::with_capacity(required),
            required,
            dimension: None,
        }
    }

    /// Require every sample to have `dimension` values.
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.dimension = dimension;
        self
    }

    /// Append a sample. Samples beyond the required count are ignored.
    ///
    /// An empty sample, or one whose length differs from the expected
    /// dimension, is refused and leaves the accumulator unchanged.
    pub fn push(&mut self, descriptor: Descriptor) -> Result<EnrollmentProgress, MatchError> {
        if descriptor.is_empty() {
            return Err(MatchError::EmptyDescriptor);
        }
        let expected = self
            .dimension
            .or_else(|| self.descriptors.first().map(Descriptor::len));
        if let Some(expected) = expected {
            if descriptor.len() != expected {
                return Err(MatchError::DimensionMismatch {
                    expected,
                    actual: descriptor.len(),
                });
            }
        }
        if !self.is_complete() {
            self.descriptors.push(descriptor);
        }
        Ok(self.progress())
    }

    pub fn progress(&self) -> EnrollmentProgress {
        EnrollmentProgress {
            name: self.name.clone(),
            collected: self.descriptors.len(),
            required: self.required,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.descriptors.len() >= self.required
    }

    pub fn into_parts(self) -> (String, Vec<Descriptor>) {
        (self.name, self.descriptors)
    }
}

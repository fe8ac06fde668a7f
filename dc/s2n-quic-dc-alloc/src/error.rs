// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, panic::Location};

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Clone, Copy)]
pub struct Error {
    kind: Kind,
    location: &'static Location<'static>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("crate", &"s2n-quic-dc-alloc")
            .field("file", &self.file())
            .field("line", &self.location.line())
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Self { kind, location } = self;
        let file = self.file();
        let line = location.line();
        write!(f, "[s2n-quic-dc-alloc::{file}:{line}]: {kind}")
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Error {
    #[track_caller]
    #[inline]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            location: Location::caller(),
        }
    }

    #[inline]
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    #[inline]
    fn file(&self) -> &'static str {
        let file = self
            .location
            .file()
            .trim_start_matches(concat!(env!("CARGO_MANIFEST_DIR"), "/src/"));
        // workspace builds report paths relative to the workspace root
        file.split_once("/src/").map_or(file, |(_, file)| file)
    }
}

impl From<Kind> for Error {
    #[track_caller]
    #[inline]
    fn from(kind: Kind) -> Self {
        Self::new(kind)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Kind {
    #[error("weight must be a finite, non-negative number")]
    InvalidWeight,
    #[error("rate must be finite and non-negative, with min_rate <= max_rate")]
    InvalidRate,
    #[error("smoothing gain must be in the range (0, 1]")]
    InvalidGain,
    #[error("the tick interval must be non-zero")]
    InvalidInterval,
    #[error("the shaper bucket capacity and queue limit must be non-zero")]
    InvalidBucket,
    #[error("weight_min must not exceed weight_max")]
    InvalidWeightBounds,
    #[error("packet is missing its allocation tag")]
    MissingTag,
    #[error("deadline-sensitive packet is missing its deadline")]
    MissingDeadline,
    #[error("packet tag does not match the flow it was classified to")]
    TagMismatch,
}

impl Kind {
    #[inline]
    #[track_caller]
    pub(crate) fn err(self) -> Error {
        Error::new(self)
    }
}

/// Returns `Err(kind)` if `weight` is negative or not finite
#[inline]
#[track_caller]
pub(crate) fn check_weight(weight: f64) -> Result<f64> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(weight)
    } else {
        Err(Kind::InvalidWeight.err())
    }
}

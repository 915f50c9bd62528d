//! Score artifacts and the scoring-kernel seam.
//!
//! The Score Writer's contract ([`ScoreWrite`]) does not care how a value was
//! computed. Provider payloads produce scores directly; everything else goes
//! through a [`ScoreKernel`]. [`PlaceholderKernel`] is a random stand-in until
//! a real kernel exists.

use std::collections::BTreeSet;

use rand_core::{OsRng, RngCore};
use serde_json::{Value, json};

use crate::{
  entity::{Confidence, ScoreSubject},
  payload::{PROVIDER_SCORE_VERSION, ScoreObservation},
  refs::SourceRef,
};

/// Everything needed to replace a subject's current score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreWrite {
  pub subject:          ScoreSubject,
  /// Passed through verbatim; range checks belong to the kernel.
  pub value:            f64,
  pub confidence:       Confidence,
  pub reason_codes:     BTreeSet<String>,
  pub feature_snapshot: Value,
  pub version:          String,
  /// Provenance to merge into the score's `external_refs`, if any.
  pub source_ref:       Option<SourceRef>,
}

impl ScoreWrite {
  pub fn from_provider(subject: ScoreSubject, observed: &ScoreObservation) -> Self {
    Self {
      subject,
      value: observed.value,
      confidence: observed.confidence,
      reason_codes: BTreeSet::new(),
      feature_snapshot: observed.feature_snapshot(),
      version: PROVIDER_SCORE_VERSION.to_owned(),
      source_ref: Some(observed.source_ref.clone()),
    }
  }

  pub fn from_kernel(subject: ScoreSubject, computed: ComputedScore) -> Self {
    Self {
      subject,
      value: computed.value,
      confidence: computed.confidence,
      reason_codes: computed.reason_codes,
      feature_snapshot: computed.features,
      version: computed.version,
      source_ref: None,
    }
  }
}

// ─── Kernel ──────────────────────────────────────────────────────────────────

/// A kernel's verdict for one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedScore {
  pub value:        f64,
  pub confidence:   Confidence,
  pub reason_codes: BTreeSet<String>,
  pub features:     Value,
  pub version:      String,
}

pub trait ScoreKernel {
  fn score(&mut self, subject: ScoreSubject) -> ComputedScore;
}

pub const PLACEHOLDER_VERSION: &str = "1.0.0";
pub const PLACEHOLDER_REASON: &str = "DATA_OK";

/// Draws a score in `[75, 85]` and a confidence in `[0.70, 0.90]`, both
/// rounded to two decimals.
pub struct PlaceholderKernel<R = OsRng> {
  rng: R,
}

impl PlaceholderKernel {
  pub fn new() -> Self { Self { rng: OsRng } }
}

impl Default for PlaceholderKernel {
  fn default() -> Self { Self::new() }
}

impl<R: RngCore> PlaceholderKernel<R> {
  pub fn with_rng(rng: R) -> Self { Self { rng } }

  fn unit(&mut self) -> f64 { f64::from(self.rng.next_u32()) / f64::from(u32::MAX) }
}

impl<R: RngCore> ScoreKernel for PlaceholderKernel<R> {
  fn score(&mut self, _subject: ScoreSubject) -> ComputedScore {
    let value = (80.0 + (self.unit() * 10.0 - 5.0)).clamp(0.0, 100.0);
    let confidence = 0.7 + self.unit() * 0.2;

    ComputedScore {
      value:        round2(value),
      confidence:   Confidence::new(round2(confidence)).unwrap_or(Confidence::PROVIDER_DEFAULT),
      reason_codes: BTreeSet::from([PLACEHOLDER_REASON.to_owned()]),
      features:     json!({ "mock": true }),
      version:      PLACEHOLDER_VERSION.to_owned(),
    }
  }
}

fn round2(v: f64) -> f64 { (v * 100.0).round() / 100.0 }

#[cfg(test)]
mod tests {
  use rand_core::impls;
  use uuid::Uuid;

  use super::*;

  /// Deterministic generator cycling through a fixed list of outputs.
  struct Cycle(Vec<u32>, usize);

  impl RngCore for Cycle {
    fn next_u32(&mut self) -> u32 {
      let v = self.0[self.1 % self.0.len()];
      self.1 += 1;
      v
    }

    fn next_u64(&mut self) -> u64 { impls::next_u64_via_u32(self) }

    fn fill_bytes(&mut self, dest: &mut [u8]) { impls::fill_bytes_via_next(self, dest) }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
      self.fill_bytes(dest);
      Ok(())
    }
  }

  fn subject() -> ScoreSubject { ScoreSubject::Product(Uuid::new_v4()) }

  #[test]
  fn extremes_of_the_generator_hit_the_bounds() {
    let mut low = PlaceholderKernel::with_rng(Cycle(vec![0], 0));
    let s = low.score(subject());
    assert_eq!(s.value, 75.0);
    assert_eq!(s.confidence.value(), 0.7);

    let mut high = PlaceholderKernel::with_rng(Cycle(vec![u32::MAX], 0));
    let s = high.score(subject());
    assert_eq!(s.value, 85.0);
    assert_eq!(s.confidence.value(), 0.9);
  }

  #[test]
  fn os_rng_stays_in_range() {
    let mut kernel = PlaceholderKernel::new();
    for _ in 0..200 {
      let s = kernel.score(subject());
      assert!((75.0..=85.0).contains(&s.value));
      assert!((0.7..=0.9).contains(&s.confidence.value()));
      assert_eq!(s.version, "1.0.0");
      assert!(s.reason_codes.contains("DATA_OK"));
      assert_eq!(s.features, json!({ "mock": true }));
    }
  }

  #[test]
  fn kernel_scores_carry_no_provenance() {
    let mut kernel = PlaceholderKernel::with_rng(Cycle(vec![7, 9], 0));
    let subject = subject();
    let write = ScoreWrite::from_kernel(subject, kernel.score(subject));
    assert_eq!(write.subject, subject);
    assert!(write.source_ref.is_none());
  }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed descriptor dimensionality. Every enrolled and probe vector has
/// exactly this many elements; enforced at construction.
pub const DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("descriptor must have {expected} elements, got {actual}")]
    WrongDimension { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum CropError {
    #[error("invalid crop buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Face descriptor used for nearest-neighbor comparison.
///
/// Valid descriptors produced by the extractor are L2-normalized
/// (norm = 1). Extraction failure is represented as `Option::None`
/// at the call sites, never as a malformed vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    /// Construct a descriptor, enforcing the fixed dimensionality.
    pub fn new(values: Vec<f32>) -> Result<Self, VectorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(VectorError::WrongDimension {
                expected: DESCRIPTOR_DIM,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Compute Euclidean distance to another descriptor.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// L2 norm of the descriptor.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

/// A cropped grayscale face region handed to the extractor.
///
/// The crop is a plain intensity buffer (`width * height` bytes); the
/// upstream detector that located it in a camera frame is not part of
/// this crate.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl FaceCrop {
    /// Wrap a raw grayscale buffer. The buffer length must match the
    /// stated dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, CropError> {
        let expected = (width as usize) * (height as usize);
        if data.len() != expected {
            return Err(CropError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Build a crop from an 8-bit grayscale image.
    pub fn from_luma(img: &image::GrayImage) -> Self {
        Self {
            data: img.as_raw().clone(),
            width: img.width(),
            height: img.height(),
        }
    }

    /// Build a crop from any decoded image, converting to single-channel
    /// intensity.
    pub fn from_image(img: &image::DynamicImage) -> Self {
        Self::from_luma(&img.to_luma8())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// A degenerate crop yields no descriptor.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }
}

/// Direction of an access event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Entry,
    Exit,
}

/// Outcome of an access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    Success,
    Failed,
}

/// Person id used for unidentified probes.
pub const UNKNOWN_PERSON: &str = "unknown";

/// A single access event. Fields are set once at construction and never
/// rewritten; downstream engines derive everything else from history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    timestamp: DateTime<Utc>,
    person_id: String,
    access_type: AccessType,
    confidence: f32,
    outcome: AccessOutcome,
}

impl AccessEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        person_id: impl Into<String>,
        access_type: AccessType,
        confidence: f32,
        outcome: AccessOutcome,
    ) -> Self {
        Self {
            timestamp,
            person_id: person_id.into(),
            access_type,
            confidence: confidence.clamp(0.0, 1.0),
            outcome,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn person_id(&self) -> &str {
        &self.person_id
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn outcome(&self) -> AccessOutcome {
        self.outcome
    }
}

/// An enrolled person with their descriptor set.
///
/// The descriptor list is append-only and holds at least one vector
/// from the moment the record exists. Enrollment never deduplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    person_id: String,
    name: String,
    role: String,
    vectors: Vec<FeatureVector>,
}

impl IdentityRecord {
    pub fn new(
        person_id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        first_vector: FeatureVector,
    ) -> Self {
        Self {
            person_id: person_id.into(),
            name: name.into(),
            role: role.into(),
            vectors: vec![first_vector],
        }
    }

    pub fn person_id(&self) -> &str {
        &self.person_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn vectors(&self) -> &[FeatureVector] {
        &self.vectors
    }

    pub(crate) fn push_vector(&mut self, vector: FeatureVector) {
        self.vectors.push(vector);
    }
}

/// Result of matching a probe descriptor against the enrollment registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Matched person, or `None` for an unknown face.
    pub person_id: Option<String>,
    /// Display name of the match, `"Unknown"` otherwise.
    pub name: String,
    /// Confidence derived from the winning distance; reported even when
    /// the match is rejected by the threshold.
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl RecognitionResult {
    /// The unknown outcome: no identity, zero confidence.
    pub fn unknown(timestamp: DateTime<Utc>) -> Self {
        Self {
            person_id: None,
            name: "Unknown".to_string(),
            confidence: 0.0,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_dimension_enforced() {
        assert!(FeatureVector::new(vec![0.0; DESCRIPTOR_DIM]).is_ok());
        assert!(FeatureVector::new(vec![0.0; 64]).is_err());
        assert!(FeatureVector::new(vec![]).is_err());
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let v = FeatureVector::new(vec![0.5; DESCRIPTOR_DIM]).unwrap();
        assert!(v.euclidean_distance(&v).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let mut a = vec![0.0; DESCRIPTOR_DIM];
        let mut b = vec![0.0; DESCRIPTOR_DIM];
        a[0] = 1.0;
        b[0] = -1.0;
        let a = FeatureVector::new(a).unwrap();
        let b = FeatureVector::new(b).unwrap();
        assert!((a.euclidean_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_crop_length_validation() {
        assert!(FaceCrop::new(vec![0u8; 12], 4, 3).is_ok());
        assert!(FaceCrop::new(vec![0u8; 11], 4, 3).is_err());
    }

    #[test]
    fn test_empty_crop_detection() {
        let crop = FaceCrop::new(vec![], 0, 0).unwrap();
        assert!(crop.is_empty());
        let crop = FaceCrop::new(vec![10u8; 4], 2, 2).unwrap();
        assert!(!crop.is_empty());
    }

    #[test]
    fn test_crop_from_luma() {
        let img = image::GrayImage::from_pixel(8, 6, image::Luma([200u8]));
        let crop = FaceCrop::from_luma(&img);
        assert_eq!(crop.width(), 8);
        assert_eq!(crop.height(), 6);
        assert_eq!(crop.data().len(), 48);
        assert!(crop.data().iter().all(|&p| p == 200));
    }

    #[test]
    fn test_event_confidence_clamped() {
        let e = AccessEvent::new(
            Utc::now(),
            "resident_001",
            AccessType::Entry,
            1.7,
            AccessOutcome::Success,
        );
        assert_eq!(e.confidence(), 1.0);
        let e = AccessEvent::new(
            Utc::now(),
            "resident_001",
            AccessType::Exit,
            -0.3,
            AccessOutcome::Failed,
        );
        assert_eq!(e.confidence(), 0.0);
    }

    #[test]
    fn test_identity_record_starts_with_one_vector() {
        let v = FeatureVector::new(vec![0.1; DESCRIPTOR_DIM]).unwrap();
        let rec = IdentityRecord::new("p1", "Alice", "resident", v);
        assert_eq!(rec.vectors().len(), 1);
    }
}

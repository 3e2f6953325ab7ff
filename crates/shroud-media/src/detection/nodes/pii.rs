//! PII analysis over detected text regions.
//!
//! Each text region is cropped, recognized by a CRNN/CTC model in batches
//! and the decoded string is classified. Recognized text never leaves this
//! module: it is not logged and not stored in the result.

use std::path::Path;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{s, Array4, ArrayView2, Axis, Ix3};
use shroud_models::{BoundingBox, Detection, DetectionResult, DetectorType, PrivacyLevel};
use tracing::debug;

use super::pii_patterns::PiiClassifier;
use crate::detection::preprocess::{write_chw, Normalization};
use crate::detection::NodeInput;
use crate::error::{MediaError, MediaResult};
use crate::registry::{ModelSession, ModelSpec, OutputTensor};

/// Symbols of the default English recognizer, in output index order
/// (index 0 is the CTC blank). A space closes the list.
const DEFAULT_CHARSET: &str =
    "0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_`abcdefghijklmnopqrstuvwxyz{|}~!\"#$%&'()*+,-./ ";

/// Load a recognizer charset: one symbol per line, space appended.
pub fn load_charset(path: &Path) -> MediaResult<Vec<char>> {
    let contents = std::fs::read_to_string(path)?;
    let mut charset: Vec<char> = contents
        .lines()
        .filter_map(|line| line.trim_end_matches('\r').chars().next())
        .collect();
    if charset.is_empty() {
        return Err(MediaError::config(format!(
            "charset file {} is empty",
            path.display()
        )));
    }
    charset.push(' ');
    Ok(charset)
}

pub fn default_charset() -> Vec<char> {
    DEFAULT_CHARSET.chars().collect()
}

/// PII analysis node.
#[derive(Clone)]
pub struct PiiNode {
    pub batch_size: usize,
    /// Minimum mean character probability at Balanced.
    pub min_text_confidence: f32,
    charset: Arc<Vec<char>>,
    classifier: Arc<PiiClassifier>,
}

impl std::fmt::Debug for PiiNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiiNode")
            .field("batch_size", &self.batch_size)
            .field("min_text_confidence", &self.min_text_confidence)
            .field("charset_len", &self.charset.len())
            .finish()
    }
}

impl PiiNode {
    pub fn new(batch_size: usize, charset: Vec<char>) -> MediaResult<Self> {
        Ok(Self {
            batch_size: batch_size.max(1),
            min_text_confidence: 0.5,
            charset: Arc::new(charset),
            classifier: Arc::new(PiiClassifier::new()?),
        })
    }

    pub fn detect(&self, input: &NodeInput, session: &ModelSession) -> MediaResult<DetectionResult> {
        let Some(text) = input.upstream.get(&DetectorType::TextDetection) else {
            return Err(MediaError::detection_failed(
                "pii analysis needs text detection results",
            ));
        };

        let regions: Vec<BoundingBox> = text
            .iter()
            .map(|d| d.bbox)
            .filter(|bbox| !bbox.is_degenerate() && bbox.is_within(input.image.width(), input.image.height()))
            .collect();
        if regions.is_empty() {
            return Ok(DetectionResult::empty());
        }

        let spec = ModelSpec::for_key(DetectorType::PiiAnalysis, input.level);
        let min_confidence = self.min_confidence(input.level);
        let mut detections = Vec::new();

        for batch in regions.chunks(self.batch_size) {
            let tensor = self.batch_tensor(&input.image, batch, spec.input_width, spec.input_height);
            let outputs = session.run(tensor)?;
            let probs = outputs.get_or_index("output", 0)?;

            for (bbox, (text, confidence)) in batch.iter().zip(self.decode_batch(probs, batch.len())?) {
                if confidence < min_confidence {
                    continue;
                }
                if let Some(kind) = self.classifier.classify(&text) {
                    detections.push(Detection::new(*bbox, confidence, kind.as_str()));
                }
            }
        }

        debug!(
            regions = regions.len(),
            matches = detections.len(),
            "PII analysis completed"
        );
        Ok(DetectionResult::new(detections))
    }

    fn min_confidence(&self, level: PrivacyLevel) -> f32 {
        (self.min_text_confidence * level.threshold_scale()).clamp(0.05, 0.95)
    }

    /// Crop, height-normalize and pad each region into one `[B, 3, H, W]`
    /// tensor.
    fn batch_tensor(&self, image: &RgbImage, regions: &[BoundingBox], width: u32, height: u32) -> Array4<f32> {
        // Zero is mid-grey after signed normalization.
        let mut tensor = Array4::zeros((regions.len(), 3, height as usize, width as usize));

        for (i, bbox) in regions.iter().enumerate() {
            let crop = imageops::crop_imm(image, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image();
            let scaled_w = ((bbox.width() as f32 * height as f32 / bbox.height() as f32).round() as u32)
                .clamp(1, width);
            let resized = imageops::resize(&crop, scaled_w, height, FilterType::Triangle);
            write_chw(tensor.slice_mut(s![i, .., .., ..]), &resized, Normalization::SIGNED);
        }

        tensor
    }

    /// Greedy CTC decoding of a `[B, T, C]` probability tensor.
    fn decode_batch(&self, probs: &OutputTensor, batch: usize) -> MediaResult<Vec<(String, f32)>> {
        if probs.shape.len() != 3 || probs.shape[0] != batch {
            return Err(MediaError::detection_failed(format!(
                "recognizer output shape {:?}, expected [{}, T, C]",
                probs.shape, batch
            )));
        }
        let view = probs
            .view()?
            .into_dimensionality::<Ix3>()
            .map_err(|e| MediaError::detection_failed(format!("recognizer output: {e}")))?;

        Ok(view
            .axis_iter(Axis(0))
            .map(|sequence| ctc_greedy_decode(sequence, &self.charset))
            .collect())
    }
}

/// Collapse repeats, drop blanks (index 0) and map indices to symbols.
/// Returns the text and the mean probability of the emitted symbols.
pub fn ctc_greedy_decode(sequence: ArrayView2<'_, f32>, charset: &[char]) -> (String, f32) {
    let mut text = String::new();
    let mut score_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut previous = 0usize;

    for step in sequence.axis_iter(Axis(0)) {
        let (index, prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        if index != 0 && index != previous {
            if let Some(&symbol) = charset.get(index - 1) {
                text.push(symbol);
                score_sum += prob;
                emitted += 1;
            }
        }
        previous = index;
    }

    let confidence = if emitted > 0 { score_sum / emitted as f32 } else { 0.0 };
    (text, confidence)
}

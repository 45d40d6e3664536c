use crate::preprocessing::LetterboxTransform;
use crate::runtime::{ClassScore, RawBox, RawOutput};
use ndarray::ArrayViewD;
use schema::{BoundingBox, Detection};

/// Label used when a model reports a box without a class name.
pub const FALLBACK_LABEL: &str = "object";

/// Turn native model output into frame-space detections.
///
/// Classification output is spread over the whole frame, one detection per
/// class. Boxes are clamped to the frame, missing labels fall back to
/// `default_label` and missing scores count as certain.
pub fn normalize(output: RawOutput, width: u32, height: u32, default_label: &str) -> Vec<Detection> {
    match output {
        RawOutput::Boxes(boxes) => boxes
            .into_iter()
            .map(|b| {
                Detection::new(
                    b.bbox.clamp_to(width, height),
                    b.label.unwrap_or_else(|| default_label.to_string()),
                    b.score.unwrap_or(1.0),
                )
            })
            .collect(),
        RawOutput::Classes(classes) => {
            let full = BoundingBox::full_frame(width, height);
            classes
                .into_iter()
                .map(|c| {
                    Detection::new(
                        full,
                        c.label.unwrap_or_else(|| default_label.to_string()),
                        c.probability.unwrap_or(1.0),
                    )
                })
                .collect()
        }
    }
}

/// Decode `labels`/`boxes`/`scores` detector heads (`[1, N]`, `[1, N, 4]` in
/// model-input xyxy pixels, `[1, N]`) into frame-space boxes.
pub fn parse_boxes(
    labels: &ArrayViewD<i64>,
    boxes: &ArrayViewD<f32>,
    scores: &ArrayViewD<f32>,
    transform: &LetterboxTransform,
    confidence_threshold: f32,
    class_names: &[String],
) -> anyhow::Result<Vec<RawBox>> {
    if labels.ndim() != 2 || boxes.ndim() != 3 || scores.ndim() != 2 {
        anyhow::bail!(
            "Unexpected detector output ranks: labels {:?}, boxes {:?}, scores {:?}",
            labels.shape(),
            boxes.shape(),
            scores.shape()
        );
    }

    let num_queries = labels.shape()[1].min(scores.shape()[1]).min(boxes.shape()[1]);
    let mut out = Vec::new();

    for i in 0..num_queries {
        let confidence = scores[[0, i]];
        if confidence < confidence_threshold {
            continue;
        }

        let bbox = transform.to_frame(
            boxes[[0, i, 0]],
            boxes[[0, i, 1]],
            boxes[[0, i, 2]],
            boxes[[0, i, 3]],
        );
        let label = usize::try_from(labels[[0, i]])
            .ok()
            .and_then(|idx| class_names.get(idx))
            .cloned();

        out.push(RawBox {
            bbox,
            label,
            score: Some(confidence),
        });
    }

    Ok(out)
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// The `k` most probable classes, best first.
pub fn top_k_classes(probabilities: &[f32], k: usize, class_names: &[String]) -> Vec<ClassScore> {
    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .take(k)
        .map(|(idx, p)| ClassScore {
            label: class_names.get(idx).cloned(),
            probability: Some(p),
        })
        .collect()
}

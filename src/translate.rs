//! Pure reshaping of DirectAI payloads into detection and classification records.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{Classification, Detection};

/// One box as reported by the remote detector, in tlbr order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDetection {
    pub score: f64,
    #[serde(rename = "class")]
    pub class_name: String,
    pub tlbr: [f64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

/// Snaps a tlbr box outward to whole pixels and clamps it into the image.
pub fn clamp_box(tlbr: [f64; 4], width: u32, height: u32) -> BoundingBox {
    let (width, height) = (i64::from(width), i64::from(height));
    let [x1, y1, x2, y2] = tlbr;

    BoundingBox {
        x_min: (x1.floor() as i64).clamp(0, width),
        y_min: (y1.floor() as i64).clamp(0, height),
        x_max: (x2.ceil() as i64).clamp(0, width),
        y_max: (y2.ceil() as i64).clamp(0, height),
    }
}

pub fn detections_from_raw(raw: Vec<RawDetection>, width: u32, height: u32) -> Vec<Detection> {
    raw.into_iter()
        .map(|det| {
            let bbox = clamp_box(det.tlbr, width, height);
            Detection {
                class_name: det.class_name,
                confidence: det.score,
                x_min: bbox.x_min,
                y_min: bbox.y_min,
                x_max: bbox.x_max,
                y_max: bbox.y_max,
            }
        })
        .collect()
}

/// Orders classes by descending score and keeps the first `count`.
///
/// Ties keep their input order. Asking for more classes than exist returns
/// all of them.
pub fn rank_classifications(scores: Vec<(String, f64)>, count: usize) -> Vec<Classification> {
    let mut ranked = scores;
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(count);

    ranked
        .into_iter()
        .map(|(class_name, confidence)| Classification {
            class_name,
            confidence,
        })
        .collect()
}

/// `/detect` answers with a JSON array whose first element holds the boxes.
pub fn parse_detect_response(body: &[u8]) -> Result<Vec<RawDetection>> {
    let batches: Vec<Vec<RawDetection>> =
        serde_json::from_slice(body).map_err(|e| Error::MalformedResponse {
            endpoint: "detect",
            reason: e.to_string(),
        })?;

    Ok(batches.into_iter().next().unwrap_or_default())
}

#[derive(Deserialize)]
struct ClassifyResponse {
    scores: serde_json::Map<String, Value>,
}

/// Scores come back in the order the remote service listed them.
pub fn parse_classify_response(body: &[u8]) -> Result<Vec<(String, f64)>> {
    let response: ClassifyResponse =
        serde_json::from_slice(body).map_err(|e| Error::MalformedResponse {
            endpoint: "classify",
            reason: e.to_string(),
        })?;

    response
        .scores
        .into_iter()
        .map(|(class_name, score)| match score.as_f64() {
            Some(score) => Ok((class_name, score)),
            None => Err(Error::MalformedResponse {
                endpoint: "classify",
                reason: format!("score for {class_name:?} is not a number: {score}"),
            }),
        })
        .collect()
}

use crate::{
    config::{ModelConfig, Validatable},
    cv_utils::{Annotation, Frame},
    labels::{ClassLabel, ClassLabels},
    model_service::{BoundingBox, Inference, ModelError, ModelService},
};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayD, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn intersection(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    let w = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let h = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    w.max(0.) * h.max(0.)
}

fn union(box1: &BoundingBox, box2: &BoundingBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn transform_frame(frame: &Frame, input_size: u32) -> Result<Array<f32, Ix4>, ModelError> {
    let rgb = frame
        .to_rgb_image()
        .map_err(|e| ModelError::Transform(e.to_string()))?;
    let img =
        DynamicImage::ImageRgb8(rgb).resize_exact(input_size, input_size, FilterType::CatmullRom);

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as _;
        let y = pixel.1 as _;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(input)
}

/// Decodes a YOLOv8 `[1, 4 + classes, anchors]` tensor into boxes scaled to
/// the original frame, then applies non-maximum suppression.
fn postprocess(
    outputs: &ArrayD<f32>,
    input_size: u32,
    img_width: u32,
    img_height: u32,
    min_probability: f32,
    iou_threshold: f32,
) -> Result<Vec<BoundingBox>, ModelError> {
    if outputs.ndim() != 3 {
        return Err(ModelError::Inference(format!(
            "unexpected output shape {:?}",
            outputs.shape()
        )));
    }

    let scale_x = img_width as f32 / input_size as f32;
    let scale_y = img_height as f32 / input_size as f32;
    let max_x = img_width as f32;
    let max_y = img_height as f32;

    let mut boxes = Vec::new();
    let transposed = outputs.t();
    let output = transposed.slice(s![.., .., 0]);

    for row in output.axis_iter(Axis(0)) {
        let row: Vec<_> = row.iter().copied().collect();
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .enumerate()
            .map(|(index, value)| (index, *value))
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        let bbox = BoundingBox {
            class_id: class_id as u32,
            confidence: prob.clamp(0., 1.),
            x1: (xc - w / 2.).clamp(0., max_x),
            y1: (yc - h / 2.).clamp(0., max_y),
            x2: (xc + w / 2.).clamp(0., max_x),
            y2: (yc + h / 2.).clamp(0., max_y),
        };
        if bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2 {
            boxes.push(bbox);
        }
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result = Vec::new();
    while !boxes.is_empty() {
        let best = boxes.remove(0);
        result.push(best);
        boxes.retain(|bbox| intersection(&best, bbox) / union(&best, bbox) < iou_threshold);
    }

    Ok(result)
}

pub struct OrtModelService {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    labels: ClassLabels,
    min_probability: f32,
    iou_threshold: f32,
    input_size: u32,
    output_name: String,
}

impl OrtModelService {
    pub fn new(
        model_config: &ModelConfig,
        labels: ClassLabels,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions for {} classes",
            num_instances,
            labels.len()
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            labels,
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
            input_size: model_config.input_size,
            output_name: model_config.output_name.clone(),
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelError::Inference(format!("invalid tensor shape: {}", e)))
    }

    fn label(&self, class_id: u32) -> ClassLabel {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| ClassLabel::unknown(class_id))
    }
}

impl ModelService for OrtModelService {
    fn infer(&self, frame: &Frame) -> Result<Inference, ModelError> {
        let input = transform_frame(frame, self.input_size)?;
        let outputs = self.run_inference(&input)?;
        let boxes = postprocess(
            &outputs,
            self.input_size,
            frame.width(),
            frame.height(),
            self.min_probability,
            self.iou_threshold,
        )?;

        let labels: Vec<ClassLabel> = boxes.iter().map(|b| self.label(b.class_id)).collect();
        let annotations: Vec<Annotation<'_>> = boxes
            .iter()
            .zip(&labels)
            .map(|(bbox, label)| Annotation {
                bbox: bbox.as_xyxy(),
                confidence: bbox.confidence,
                label,
            })
            .collect();

        let mut annotated = frame.try_clone()?;
        annotated.annotate(&annotations)?;

        Ok(Inference { boxes, annotated })
    }

    fn class_name(&self, class_id: u32) -> String {
        self.label(class_id).label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_bytes;

    fn anchor(values: &mut [f32], anchors: usize, index: usize, row: [f32; 6]) {
        for (channel, value) in row.into_iter().enumerate() {
            values[channel * anchors + index] = value;
        }
    }

    #[test]
    fn test_transform_frame() {
        let frame = Frame::decode(&png_bytes(100, 50)).unwrap();

        let input = transform_frame(&frame, 64).unwrap();

        assert_eq!(input.shape(), &[1, 3, 64, 64]);
        assert!((input[[0, 0, 10, 10]] - 1.0).abs() < 1e-3);
        assert!(input[[0, 2, 10, 10]].abs() < 1e-3);
    }

    #[test]
    fn test_postprocess_scales_and_suppresses() {
        // 2 classes, 4 anchors on a 100x100 model input.
        let anchors = 4;
        let mut values = vec![0.0; 6 * anchors];
        anchor(&mut values, anchors, 0, [50., 50., 20., 20., 0.9, 0.1]);
        anchor(&mut values, anchors, 1, [51., 51., 20., 20., 0.8, 0.1]);
        anchor(&mut values, anchors, 2, [10., 10., 8., 8., 0.05, 0.6]);
        anchor(&mut values, anchors, 3, [80., 80., 8., 8., 0.1, 0.1]);
        let outputs = ArrayD::from_shape_vec(vec![1, 6, anchors], values).unwrap();

        let boxes = postprocess(&outputs, 100, 200, 100, 0.25, 0.7).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 0);
        assert!((boxes[0].x1 - 80.0).abs() < 1e-3);
        assert!((boxes[0].x2 - 120.0).abs() < 1e-3);
        assert!((boxes[0].y1 - 40.0).abs() < 1e-3);
        assert_eq!(boxes[1].class_id, 1);
        for bbox in &boxes {
            assert!((0.0..=1.0).contains(&bbox.confidence));
            assert!(bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2);
        }
    }

    #[test]
    fn test_postprocess_clamps_to_frame() {
        // Single class, single anchor centred on the top-left corner.
        let values = vec![0., 0., 40., 40., 0.7];
        let outputs = ArrayD::from_shape_vec(vec![1, 5, 1], values).unwrap();

        let boxes = postprocess(&outputs, 100, 100, 100, 0.25, 0.7).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].as_xyxy(), [0., 0., 20., 20.]);
    }

    #[test]
    fn test_postprocess_terminates_with_loose_iou_threshold() {
        let values = vec![50., 50., 20., 20., 0.9];
        let outputs = ArrayD::from_shape_vec(vec![1, 5, 1], values).unwrap();

        let boxes = postprocess(&outputs, 100, 100, 100, 0.25, 1.5).unwrap();

        assert_eq!(boxes.len(), 1);
    }

    #[test]
    fn test_postprocess_rejects_bad_shape() {
        let outputs = ArrayD::from_shape_vec(vec![6, 4], vec![0.0; 24]).unwrap();
        assert!(postprocess(&outputs, 640, 10, 10, 0.25, 0.7).is_err());
    }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/pipeline.rs - 检测流程端到端测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;

use shanan_fastest::{
  FromUrl,
  engine::ReplayEngine,
  input::ImageFileInput,
  model::{
    Anchor, Model, ModelConfig, RawTensor, ScaleParams, ShapeError, TargetBox, YoloFastest,
    YoloFastestBuilder, YoloFastestError,
  },
  output::OutputWrapper,
  task::{OneShotTask, RepeatShotTask, Task},
};

// 4x4 输入, 每个尺度 1 个锚框, 1 个类别: 单元格为 [x, y, w, h, obj, cls]
const CONFIG_TOML: &str = r#"
input_name = "data"
input_width = 4
input_height = 4
num_category = 1
nms_thresh = 0.25
thresh = 0.3
num_threads = 1

[[scales]]
output_name = "fine"
anchors = [{ width = 2.0, height = 3.0 }]

[[scales]]
output_name = "coarse"
anchors = [{ width = 4.0, height = 4.0 }]
"#;

fn config() -> ModelConfig {
  ModelConfig {
    input_name: "data".to_string(),
    input_width: 4,
    input_height: 4,
    num_category: 1,
    num_threads: 1,
    scales: [
      ScaleParams {
        output_name: "fine".to_string(),
        anchors: vec![Anchor::new(2.0, 3.0)],
      },
      ScaleParams {
        output_name: "coarse".to_string(),
        anchors: vec![Anchor::new(4.0, 4.0)],
      },
    ],
    ..ModelConfig::default()
  }
}

fn cell(obj: f32) -> RawTensor {
  RawTensor::new(1, 1, 6, vec![0.5, 0.5, 0.5, 0.5, obj, 1.0]).unwrap()
}

fn engine(fine_obj: f32, coarse_obj: f32) -> ReplayEngine {
  ReplayEngine::from_outputs(
    "data",
    [
      ("fine".to_string(), cell(fine_obj)),
      ("coarse".to_string(), cell(coarse_obj)),
    ],
  )
}

fn detector(fine_obj: f32, coarse_obj: f32) -> YoloFastest<ReplayEngine> {
  YoloFastest::new(engine(fine_obj, coarse_obj), config()).unwrap()
}

// 细尺度框在输入空间为 (1, 0.5, 3, 3.5)，8x8 原图下放大 2 倍
fn fine_box(score: f32) -> TargetBox {
  TargetBox {
    x1: 2.0,
    y1: 1.0,
    x2: 6.0,
    y2: 7.0,
    category: 0,
    score,
  }
}

#[test]
fn keeps_only_boxes_above_threshold() {
  let boxes = detector(0.9, 0.1).detect(&RgbImage::new(8, 8), 0.3).unwrap();
  assert_eq!(boxes, vec![fine_box(0.9)]);
}

#[test]
fn overlapping_boxes_are_suppressed() {
  // 粗尺度框 (0, 0, 4, 4) 与细尺度框 IoU 为 6 / 16
  let boxes = detector(0.9, 0.5).detect(&RgbImage::new(8, 8), 0.3).unwrap();
  assert_eq!(boxes, vec![fine_box(0.9)]);

  let mut loose = config();
  loose.nms_thresh = 0.5;
  let detector = YoloFastest::new(engine(0.9, 0.5), loose).unwrap();
  let boxes = detector.detect(&RgbImage::new(8, 8), 0.3).unwrap();
  assert_eq!(boxes.len(), 2);
  assert_eq!(boxes[0], fine_box(0.9));
  assert_eq!(
    boxes[1],
    TargetBox {
      x1: 0.0,
      y1: 0.0,
      x2: 8.0,
      y2: 8.0,
      category: 0,
      score: 0.5,
    }
  );
}

#[test]
fn quiet_outputs_give_no_detections() {
  let boxes = detector(0.0, 0.0).detect(&RgbImage::new(8, 8), 0.3).unwrap();
  assert!(boxes.is_empty());
}

#[test]
fn repeated_detection_is_identical() {
  let detector = detector(0.9, 0.5);
  let image = RgbImage::new(16, 12);
  let first = detector.infer(&image).unwrap();
  for _ in 0..3 {
    assert_eq!(detector.infer(&image).unwrap(), first);
  }
}

#[test]
fn missing_output_is_extract_error() {
  let engine = ReplayEngine::from_outputs("data", [("fine".to_string(), cell(0.9))]);
  let detector = YoloFastest::new(engine, config()).unwrap();
  match detector.detect(&RgbImage::new(8, 8), 0.3) {
    Err(YoloFastestError::ExtractError { output, .. }) => assert_eq!(output, "coarse"),
    other => panic!("unexpected result: {:?}", other),
  }
}

#[test]
fn channel_mismatch_is_shape_error() {
  let engine = ReplayEngine::from_outputs(
    "data",
    [
      ("fine".to_string(), cell(0.9)),
      (
        "coarse".to_string(),
        RawTensor::new(1, 1, 7, vec![0.0; 7]).unwrap(),
      ),
    ],
  );
  let detector = YoloFastest::new(engine, config()).unwrap();
  assert!(matches!(
    detector.detect(&RgbImage::new(8, 8), 0.3),
    Err(YoloFastestError::ShapeError(ShapeError::Channels {
      expected: 6,
      actual: 7,
      ..
    }))
  ));
}

#[test]
fn rejects_invalid_threshold_and_empty_image() {
  let detector = detector(0.9, 0.1);
  assert!(matches!(
    detector.detect(&RgbImage::new(8, 8), f32::NAN),
    Err(YoloFastestError::InvalidThreshold(_))
  ));
  // 全负分数不能靠负阈值混入结果
  assert!(matches!(
    detector.detect(&RgbImage::new(8, 8), -1.0),
    Err(YoloFastestError::InvalidThreshold(_))
  ));
  assert!(detector.detect(&RgbImage::new(8, 8), 0.0).is_ok());
  assert!(matches!(
    detector.detect(&RgbImage::new(0, 8), 0.3),
    Err(YoloFastestError::EmptyImage)
  ));
}

#[test]
fn builder_loads_replay_model_from_disk() {
  let dir = tempfile::tempdir().unwrap();
  let param = dir.path().join("model.param");
  let bin = dir.path().join("model.bin");
  let config_path = dir.path().join("model.toml");
  engine(0.9, 0.1).save(&param, &bin).unwrap();
  std::fs::write(&config_path, CONFIG_TOML).unwrap();

  let detector: YoloFastest<ReplayEngine> = YoloFastestBuilder::new(&param, &bin)
    .config_path(&config_path)
    .build()
    .unwrap();
  assert_eq!(detector.config(), &config());
  let boxes = detector.detect(&RgbImage::new(8, 8), 0.3).unwrap();
  assert_eq!(boxes, vec![fine_box(0.9)]);
}

#[test]
fn builder_reports_missing_model() {
  let dir = tempfile::tempdir().unwrap();
  let result = YoloFastestBuilder::new(dir.path().join("none.param"), dir.path().join("none.bin"))
    .build::<ReplayEngine>();
  assert!(matches!(result, Err(YoloFastestError::ModelLoadError(_))));
}

#[test]
fn tasks_write_records() {
  let dir = tempfile::tempdir().unwrap();
  let image_path = dir.path().join("input.png");
  RgbImage::new(8, 8).save(&image_path).unwrap();
  let record_path = dir.path().join("out").join("record.json");

  let input = ImageFileInput::from_url(
    &url::Url::parse(&format!("image://{}", image_path.display())).unwrap(),
  )
  .unwrap();
  let output = OutputWrapper::from_url(
    &url::Url::parse(&format!("record://{}", record_path.display())).unwrap(),
  )
  .unwrap();
  OneShotTask.run_task(input, detector(0.9, 0.1), output).unwrap();

  let value: serde_json::Value =
    serde_json::from_slice(&std::fs::read(&record_path).unwrap()).unwrap();
  assert_eq!(value["detections"].as_array().unwrap().len(), 1);
  assert_eq!(value["detections"][0]["label"], "person");
  assert_eq!(value["detections"][0]["x2"], 6.0);

  let input = ImageFileInput::open(&image_path).unwrap();
  let output = OutputWrapper::from_url(
    &url::Url::parse(&format!("record://{}", record_path.display())).unwrap(),
  )
  .unwrap();
  RepeatShotTask::new(4)
    .run_task(input, detector(0.9, 0.5), output)
    .unwrap();
}

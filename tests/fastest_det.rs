// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/fastest_det.rs - FastestDet 检测流程测试
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
  model::{
    FastestDet, FastestDetConfig, FastestDetError, Model, ModelBuilder, ModelWrapper, RawTensor,
    ShapeError, TargetBox,
  },
};

// 4x4 输入, 2x2 网格, 2 个类别: 单元格为 [obj, tx, ty, tw, th, cls0, cls1]
const CONFIG_TOML: &str = r#"
input_width = 4
input_height = 4
num_category = 2
num_threads = 1
"#;

fn config() -> FastestDetConfig {
  FastestDetConfig {
    input_width: 4,
    input_height: 4,
    num_category: 2,
    num_threads: 1,
    ..FastestDetConfig::default()
  }
}

fn grid(second: [f32; 7]) -> RawTensor {
  let mut data = vec![0f32; 2 * 2 * 7];
  data[..7].copy_from_slice(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
  data[7..14].copy_from_slice(&second);
  RawTensor::new(2, 2, 7, data).unwrap()
}

fn engine(second: [f32; 7]) -> ReplayEngine {
  ReplayEngine::from_outputs("input.1", [("758".to_string(), grid(second))])
}

// (0, 0) 单元在 8x8 原图中的框
fn first_box() -> TargetBox {
  TargetBox {
    x1: -2.0,
    y1: -2.0,
    x2: 2.0,
    y2: 2.0,
    category: 0,
    score: 1.0,
  }
}

#[test]
fn decodes_grid_cells_in_score_order() {
  let detector = FastestDet::new(engine([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5]), config()).unwrap();
  let boxes = detector.detect(&RgbImage::new(8, 8), 0.3).unwrap();
  assert_eq!(
    boxes,
    vec![
      first_box(),
      TargetBox {
        x1: 2.0,
        y1: -2.0,
        x2: 6.0,
        y2: 2.0,
        category: 1,
        score: 0.5f32.powf(0.4),
      },
    ]
  );
}

#[test]
fn overlapping_cells_are_suppressed() {
  // tanh(-10) 使第二个单元的中心落在第一个单元上
  let detector =
    FastestDet::new(engine([1.0, -10.0, 0.0, 0.0, 0.0, 0.5, 0.0]), config()).unwrap();
  let boxes = detector.detect(&RgbImage::new(8, 8), 0.3).unwrap();
  assert_eq!(boxes, vec![first_box()]);
}

#[test]
fn configured_threshold_drives_infer() {
  let detector = FastestDet::new(
    engine([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5]),
    FastestDetConfig {
      thresh: 0.9,
      ..config()
    },
  )
  .unwrap();
  assert_eq!(detector.infer(&RgbImage::new(8, 8)).unwrap(), vec![first_box()]);
}

#[test]
fn rejects_bad_threshold_image_and_shape() {
  let detector = FastestDet::new(engine([0.0; 7]), config()).unwrap();
  assert!(matches!(
    detector.detect(&RgbImage::new(8, 8), -0.1),
    Err(FastestDetError::InvalidThreshold(_))
  ));
  assert!(matches!(
    detector.detect(&RgbImage::new(8, 0), 0.3),
    Err(FastestDetError::EmptyImage)
  ));

  let detector = FastestDet::new(
    engine([0.0; 7]),
    FastestDetConfig {
      num_category: 80,
      ..config()
    },
  )
  .unwrap();
  assert!(matches!(
    detector.detect(&RgbImage::new(8, 8), 0.3),
    Err(FastestDetError::ShapeError(ShapeError::GridChannels {
      expected: 85,
      actual: 7
    }))
  ));
}

#[test]
fn missing_output_is_extract_error() {
  let engine = ReplayEngine::from_outputs("input.1", [("757".to_string(), grid([0.0; 7]))]);
  let detector = FastestDet::new(engine, config()).unwrap();
  match detector.detect(&RgbImage::new(8, 8), 0.3) {
    Err(FastestDetError::ExtractError { output, .. }) => assert_eq!(output, "758"),
    other => panic!("unexpected result: {:?}", other),
  }
}

#[test]
fn model_builder_loads_fastest_det_from_disk() {
  let dir = tempfile::tempdir().unwrap();
  let param = dir.path().join("det.param");
  let bin = dir.path().join("det.bin");
  let config_path = dir.path().join("det.toml");
  engine([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5])
    .save(&param, &bin)
    .unwrap();
  std::fs::write(&config_path, CONFIG_TOML).unwrap();

  let url = url::Url::parse(&format!(
    "fastest-det://{}?config={}",
    param.display(),
    config_path.display()
  ))
  .unwrap();
  let model: ModelWrapper<ReplayEngine> = ModelBuilder::from_url(&url)
    .unwrap()
    .thresh(0.9)
    .build()
    .unwrap();
  assert!(matches!(model, ModelWrapper::FastestDet(_)));
  assert_eq!(model.num_category(), 2);
  assert_eq!(model.infer(&RgbImage::new(8, 8)).unwrap(), vec![first_box()]);
}

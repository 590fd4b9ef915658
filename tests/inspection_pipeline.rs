//! Inspection pipeline integration tests
//!
//! Builds the orchestrator from configuration against a seeded checkpoint
//! in a temp directory and drives classify -> explain -> record end to end.

use castscope::config::{InspectionConfig, LlmProvider};
use castscope::model::{ModelArchitecture, ModelCheckpoint};
use castscope::{
    Classifier, ClassifierError, DefectClass, GradCam, HistoryStore, InspectionError, InspectionOrchestrator,
};

use chrono::Duration;
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;

fn arch() -> ModelArchitecture {
    ModelArchitecture {
        input_width: 24,
        input_height: 24,
        conv_channels: vec![4, 8],
        kernel_size: 3,
        pool_between_blocks: true,
    }
}

fn test_config(dir: &tempfile::TempDir) -> InspectionConfig {
    let model_path = dir.path().join("models").join("classifier.json");
    ModelCheckpoint::seeded(&arch(), 99).save(&model_path).unwrap();

    let mut config = InspectionConfig::default();
    config.model.checkpoint_path = model_path;
    config.history.db_path = dir.path().join("history.db");
    config.llm.provider = LlmProvider::Rules;
    config
}

fn casting(salt: u32) -> RgbImage {
    RgbImage::from_fn(64, 48, |x, y| {
        let d = ((x as i32 - 32).pow(2) + (y as i32 - 24).pow(2)) as u32;
        let base = if d < 300 { 190 } else { 80 };
        let noise = ((x * 31 + y * 17 + salt * 13) % 23) as u8;
        Rgb([base + noise, base + noise / 2, base])
    })
}

#[test]
fn test_end_to_end_inspection_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = InspectionOrchestrator::open(&test_config(&dir)).unwrap();

    let image = DynamicImage::ImageRgb8(casting(1));
    let result = orchestrator.inspect(&image).unwrap();

    assert!(result.history_persisted);
    assert!((result.class_probabilities.sum() - 1.0).abs() < 1e-6);
    assert_eq!(result.confidence, result.class_probabilities.get(result.predicted_class));
    assert!(result.explanation_map.values.iter().all(|v| (0.0..=1.0).contains(v)));
    assert_eq!(result.overlay.dimensions(), (64, 48));

    let records = orchestrator.history(Duration::days(1)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, result.id);
    assert_eq!(records[0].predicted_class, result.predicted_class);
    assert_eq!(records[0].confidence, result.confidence);
    assert_eq!(records[0].class_probabilities, result.class_probabilities);

    let stats = orchestrator.statistics(Duration::days(1)).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.count(result.predicted_class), 1);
    assert!((stats.avg_confidence - result.confidence * 100.0).abs() < 1e-9);
}

#[test]
fn test_missing_weights_fail_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.model.checkpoint_path = dir.path().join("absent.json");

    match InspectionOrchestrator::open(&config) {
        Err(InspectionError::Classifier(ClassifierError::ModelLoad { path, .. })) => {
            assert_eq!(path, dir.path().join("absent.json"));
        }
        Err(other) => panic!("expected ModelLoad, got {other}"),
        Ok(_) => panic!("orchestrator must not start without weights"),
    }
}

#[test]
fn test_concurrent_inspections_are_each_recorded_once() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(InspectionOrchestrator::open(&test_config(&dir)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orch = Arc::clone(&orchestrator);
            std::thread::spawn(move || orch.inspect_rgb(&casting(i)).unwrap())
        })
        .collect();
    let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().id).collect();

    let records = orchestrator.history(Duration::days(1)).unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let mut recorded: Vec<_> = records.iter().map(|r| r.id).collect();
    ids.sort();
    recorded.sort();
    assert_eq!(ids, recorded);
}

#[test]
fn test_same_input_gives_same_explanation() {
    let checkpoint = ModelCheckpoint::seeded(&arch(), 5);
    let classifier = Classifier::from_checkpoint(checkpoint, &Default::default()).unwrap();
    let engine = GradCam::new(0.4);
    let image = casting(3);

    let explain = |class: DefectClass| {
        let mut lease = classifier.acquire();
        let (prediction, artifacts) = lease.predict(&image).unwrap();
        engine.explain(&lease, artifacts, prediction.target_for(class), &image).unwrap()
    };

    for class in DefectClass::ALL {
        let a = explain(class);
        let b = explain(class);
        assert_eq!(a.map, b.map, "explanation for {class} not deterministic");
    }
}

#[test]
fn test_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let first = {
        let orchestrator = InspectionOrchestrator::open(&config).unwrap();
        let result = orchestrator.inspect_rgb(&casting(2)).unwrap();
        orchestrator.shutdown().unwrap();
        result
    };

    let history = HistoryStore::open(&config.history.db_path, true).unwrap();
    let records = history.query(Duration::days(1)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, first.id);
}

#[test]
fn test_config_roundtrip_through_toml() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let path = dir.path().join("castscope.toml");
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();

    let loaded = InspectionConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.model.checkpoint_path, config.model.checkpoint_path);
    assert_eq!(loaded.history.db_path, config.history.db_path);
    assert_eq!(loaded.llm.provider, LlmProvider::Rules);
}

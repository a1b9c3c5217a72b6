//! 时间权威单元测试

use attendance_core::models::catalog::DEFAULT_CATALOG;
use attendance_core::models::drift::{DeviceClass, DriftAction, DriftCategory};
use attendance_core::services::time_authority::{classify, detect_oscillation, drift_between};
use chrono::{Duration, Utc};

#[test]
fn test_android_bands_from_default_catalog() {
    let t = DEFAULT_CATALOG
        .drift_thresholds_for(DeviceClass::MobileAndroid)
        .unwrap();

    assert_eq!(classify(0, t), DriftCategory::Acceptable);
    assert_eq!(classify(7, t), DriftCategory::Acceptable);
    assert_eq!(classify(299, t), DriftCategory::Acceptable);
    assert_eq!(classify(300, t), DriftCategory::Warning);
    assert_eq!(classify(600, t), DriftCategory::Blocked);
    assert_eq!(classify(3600, t), DriftCategory::Critical);
}

#[test]
fn test_server_ahead_650s_on_android_is_blocked() {
    // 客户端报 T，服务器在 T+650s 收到：BLOCKED，动作为拒绝
    let t = DEFAULT_CATALOG
        .drift_thresholds_for(DeviceClass::MobileAndroid)
        .unwrap();

    let client = Utc::now();
    let server = client + Duration::seconds(650);
    let drift = drift_between(client, server);
    assert_eq!(drift, 650);

    let category = classify(drift, t);
    assert_eq!(category, DriftCategory::Blocked);
    assert_eq!(category.action(), DriftAction::Reject);
}

#[test]
fn test_classification_is_pure_across_device_classes() {
    // 相同输入和阈值永远得到相同档位与动作
    for class in [
        DeviceClass::MobileAndroid,
        DeviceClass::MobileIos,
        DeviceClass::KioskTablet,
        DeviceClass::WebBrowser,
    ] {
        let t = DEFAULT_CATALOG.drift_thresholds_for(class).unwrap();
        for drift in [-7200, -650, -30, 0, 30, 650, 7200] {
            let first = classify(drift, t);
            for _ in 0..5 {
                assert_eq!(classify(drift, t), first);
                assert_eq!(classify(drift, t).action(), first.action());
            }
        }
    }
}

#[test]
fn test_bands_are_exhaustive_and_non_overlapping() {
    // 每个 |drift| 恰好落入一个档
    let t = DEFAULT_CATALOG
        .drift_thresholds_for(DeviceClass::KioskTablet)
        .unwrap();

    let mut last = DriftCategory::Acceptable;
    for drift in 0..=(t.critical_secs + 10) {
        let category = classify(drift, t);
        // 档位随漂移单调不减
        assert!(category >= last, "category regressed at drift {}", drift);
        last = category;
    }
    assert_eq!(last, DriftCategory::Critical);
}

#[test]
fn test_negative_drift_classified_by_magnitude() {
    let t = DEFAULT_CATALOG
        .drift_thresholds_for(DeviceClass::WebBrowser)
        .unwrap();
    // 客户端快于服务器同样按幅度分档
    assert_eq!(classify(-t.blocked_secs, t), DriftCategory::Blocked);
    assert_eq!(classify(-t.critical_secs, t), DriftCategory::Critical);
}

#[test]
fn test_oscillation_flags_alternating_large_drift() {
    // 同一设备短窗口内大幅正负交替
    assert!(detect_oscillation(&[-700, 650, -680], 720, 600, 2));
    // 单调漂移（时钟持续慢）不是振荡
    assert!(!detect_oscillation(&[600, 640, 700], 720, 600, 2));
    // 小幅抖动不触发
    assert!(!detect_oscillation(&[-10, 10, -10], 10, 600, 2));
}

//! Lifecycle tests driving the controller with a manual simulator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tdcpix_core::{Attribute, HistogramVariant, TimeUnit};
use tdcpix_daq::registry::{
    ACCU_T, ACCU_XT, ACCU_XY, ACCU_XYT, ACCU_YT, FULL_T, LIVE_T, LIVE_XY, USER_T,
};
use tdcpix_daq::{
    AcquisitionController, CompletionReason, ControllerConfig, ControllerEvent, ControllerState,
    DeviceState, Error, SimDriver, WriteOutcome,
};

/// Cube time bin width in raw units.
const CUBE_BINT: i64 = 1 << 24;

fn controller_with(config: ControllerConfig) -> (Arc<AcquisitionController>, Arc<SimDriver>) {
    let sim = Arc::new(SimDriver::manual());
    let controller = AcquisitionController::new(config, Arc::clone(&sim)).unwrap();
    {
        let mut cube = controller.registry().lock(ACCU_XYT).unwrap();
        cube.set(Attribute::RoiX2, 7).unwrap();
        cube.set(Attribute::RoiY2, 7).unwrap();
        cube.set(Attribute::RoiTSize, 4).unwrap();
    }
    (controller, sim)
}

fn controller() -> (Arc<AcquisitionController>, Arc<SimDriver>) {
    controller_with(ControllerConfig::default())
}

fn sum(controller: &AcquisitionController, name: &str) -> u64 {
    controller
        .registry()
        .lock(name)
        .unwrap()
        .snapshot_u32()
        .map(|v| v.iter().map(|&p| u64::from(p)).sum())
        .unwrap_or(0)
}

#[test]
fn test_bind_activates_driver_backed_pipes() {
    let (controller, sim) = controller();
    assert_eq!(controller.state(), ControllerState::Unbound);
    controller.bind().unwrap();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.device_state(), DeviceState::On);
    // Live_XY and Full_XY
    assert_eq!(sim.opened(HistogramVariant::ImageXY), 2);
    // Live_T, Full_T, Full_Counts, User_T
    assert_eq!(sim.opened(HistogramVariant::Spectrum1D), 4);
    assert_eq!(sim.opened(HistogramVariant::Cube3D), 0);
    assert!(matches!(controller.bind(), Err(Error::AlreadyBound)));
}

#[test]
fn test_unbind_when_idle_closes_everything() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.unbind().unwrap();
    assert_eq!(controller.state(), ControllerState::Unbound);
    assert_eq!(controller.device_state(), DeviceState::Off);
    assert!(!sim.is_initialized());
    assert_eq!(sim.open_pipes(), 0);
    assert!(matches!(controller.unbind(), Err(Error::NotBound)));
}

#[test]
fn test_accumulation_guard() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();
    assert_eq!(controller.state(), ControllerState::Accumulating);
    assert_eq!(sim.opened(HistogramVariant::Cube3D), 1);

    sim.inject(&[(10, 10, 0), (20, 30, 0)]);
    let before = controller.registry().lock(LIVE_XY).unwrap().snapshot_u32().unwrap();
    let outcome = controller
        .write_attribute(LIVE_XY, Attribute::RoiX2, 100)
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Rejected);
    let outcome = controller
        .write_attribute(ACCU_XYT, Attribute::RoiX1, 2)
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Rejected);
    controller.wait_idle();
    let after = controller.registry().lock(LIVE_XY).unwrap().snapshot_u32().unwrap();
    assert_eq!(before, after);
    assert_eq!(controller.read_attribute(LIVE_XY, Attribute::RoiX2).unwrap(), 511);

    // pipeless views stay writable
    let outcome = controller
        .write_attribute(ACCU_XY, Attribute::RoiT1, 2)
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Scheduled);
    controller.wait_idle();
    assert_eq!(controller.read_attribute(ACCU_XY, Attribute::RoiT1).unwrap(), 2);
}

#[test]
fn test_deferred_writes_drain_in_order() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.acquisition_start().unwrap();
    assert!(controller.is_acquiring());
    let opened = sim.opened(HistogramVariant::ImageXY);

    for v in [100, 200, 50] {
        let outcome = controller
            .write_attribute(LIVE_XY, Attribute::RoiX2, v)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Deferred);
    }
    assert_eq!(controller.pending_writes(), 3);
    assert_eq!(controller.read_attribute(LIVE_XY, Attribute::RoiX2).unwrap(), 511);

    sim.complete(CompletionReason::UserInterrupt);
    assert_eq!(controller.pending_writes(), 0);
    // every write reopened the pipe exactly once
    assert_eq!(sim.opened(HistogramVariant::ImageXY), opened + 3);
    assert_eq!(controller.read_attribute(LIVE_XY, Attribute::RoiX2).unwrap(), 50);
    // live view restarts on its own
    assert_eq!(sim.starts(), 2);
    assert!(controller.is_acquiring());

    sim.complete(CompletionReason::TimeElapsed);
    assert_eq!(sim.opened(HistogramVariant::ImageXY), opened + 3);
}

#[test]
fn test_deferred_unbind() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.acquisition_start().unwrap();
    controller.unbind().unwrap();
    assert!(sim.is_initialized());
    assert!(matches!(controller.acquisition_start(), Err(Error::NotBound)));

    sim.complete(CompletionReason::UserInterrupt);
    assert!(!sim.is_initialized());
    assert_eq!(controller.state(), ControllerState::Unbound);
    assert_eq!(controller.device_state(), DeviceState::Off);
    assert_eq!(sim.starts(), 1);
}

#[test]
fn test_accumulation_start_waits_for_idle_driver() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.acquisition_start().unwrap();
    controller.accumulation_start().unwrap();
    assert!(controller.is_accumulating());
    assert_eq!(controller.state(), ControllerState::Acquiring);
    assert_eq!(sim.opened(HistogramVariant::Cube3D), 0);

    sim.complete(CompletionReason::UserInterrupt);
    assert_eq!(sim.opened(HistogramVariant::Cube3D), 1);
    assert_eq!(controller.state(), ControllerState::Accumulating);
    assert_eq!(sim.starts(), 2);
    assert!(controller.last_statistics().is_some());
}

#[test]
fn test_accumulation_stop_defers_pipe_close() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();
    let events = controller.subscribe();
    controller.accumulation_stop();
    assert!(!controller.is_accumulating());
    assert_eq!(sim.closed(HistogramVariant::Cube3D), 0);

    sim.complete(CompletionReason::UserInterrupt);
    assert_eq!(sim.closed(HistogramVariant::Cube3D), 1);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(sim.starts(), 1);
    assert!(events
        .try_iter()
        .any(|e| e == ControllerEvent::AccumulationStopped));
}

#[test]
fn test_auto_stop_after_target_time() {
    let config = ControllerConfig {
        exposure_accu_ms: 500,
        ..ControllerConfig::default()
    };
    let (controller, sim) = controller_with(config);
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();

    let start = Instant::now();
    controller.tick_at(start + Duration::from_millis(100));
    assert!(controller.is_accumulating());
    controller.tick_at(start + Duration::from_millis(600));
    assert!(!controller.is_accumulating());
    assert!(controller.accumulated_time_ms() >= 500);
    assert!(sim.interrupts() >= 1);

    sim.complete(CompletionReason::TimeElapsed);
    assert_eq!(sim.closed(HistogramVariant::Cube3D), 1);
    assert_eq!(controller.state(), ControllerState::Idle);
    controller.wait_idle();
}

#[test]
fn test_cube_write_fans_out() {
    let (controller, _sim) = controller();
    let outcome = controller
        .write_attribute(ACCU_XYT, Attribute::RoiX1, 4)
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Scheduled);
    controller
        .write_attribute(ACCU_XYT, Attribute::RoiTSize, 10)
        .unwrap();
    controller.wait_idle();

    assert_eq!(controller.read_attribute(ACCU_XY, Attribute::RoiX1).unwrap(), 4);
    assert_eq!(controller.read_attribute(ACCU_XT, Attribute::RoiX1).unwrap(), 4);
    assert_eq!(controller.read_attribute(ACCU_YT, Attribute::RoiX1).unwrap(), 0);
    for view in [ACCU_XT, ACCU_YT, ACCU_T] {
        assert_eq!(controller.read_attribute(view, Attribute::RoiT1).unwrap(), 0);
        assert_eq!(controller.read_attribute(view, Attribute::RoiT2).unwrap(), 9);
    }
    // x 4..=7, y 0..=7, t 0..=9, four bytes each
    assert_eq!(controller.accumulation_cube_size().0, 4 * 8 * 10 * 4);
}

#[test]
fn test_write_rules() {
    let (controller, _sim) = controller();
    assert!(matches!(
        controller.write_attribute("Hist_Missing", Attribute::RoiX1, 1),
        Err(Error::UnknownHistogram(_))
    ));
    assert_eq!(
        controller.write_attribute(FULL_T, Attribute::BinT, 8).unwrap(),
        WriteOutcome::Ignored
    );
    assert_eq!(
        controller
            .write_attribute(ACCU_XT, Attribute::RoiX1, 8)
            .unwrap(),
        WriteOutcome::Ignored
    );
    assert_eq!(
        controller
            .write_attribute_by_name(LIVE_XY, "ROI_Q1", 8)
            .unwrap(),
        WriteOutcome::Ignored
    );
}

#[test]
fn test_user_spectrum_links() {
    let (controller, _sim) = controller();
    controller.write_attribute(USER_T, Attribute::RoiTOffset, 3).unwrap();
    controller.wait_idle();
    assert_eq!(controller.user_spectrum_links().raw_toff, 3 * 4_194_304);

    controller.set_user_raw_toff_fixed(true);
    controller.write_attribute(USER_T, Attribute::BinT, 1024).unwrap();
    controller.wait_idle();
    assert_eq!(controller.read_attribute(USER_T, Attribute::RoiTOffset).unwrap(), 3 * 4096);

    controller.set_user_raw_toff_fixed(false);
    controller.write_attribute(USER_T, Attribute::BinT, 2048).unwrap();
    controller.wait_idle();
    assert_eq!(controller.user_spectrum_links().raw_toff, 3 * 4096 * 2048);

    controller.write_attribute(USER_T, Attribute::Modulo, 8192).unwrap();
    controller.wait_idle();
    assert_eq!(controller.user_spectrum_links().modulo_binned, 4);
}

#[test]
fn test_accumulation_views_conserve_counts() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();
    sim.inject(&[
        (0, 0, 0),
        (3, 5, CUBE_BINT),
        (15, 15, 3 * CUBE_BINT),
        (100, 0, 0),
        (0, 0, 9 * CUBE_BINT),
    ]);
    assert_eq!(sum(&controller, ACCU_XYT), 3);

    controller.refresh_accumulation_views();
    for view in [ACCU_XY, ACCU_XT, ACCU_YT, ACCU_T] {
        assert_eq!(sum(&controller, view), 3, "{view}");
    }
    let yt = controller.registry().lock(ACCU_YT).unwrap();
    assert_eq!((yt.width(), yt.height()), (8, 4));
    drop(yt);
    assert!(controller.image_statistics(ACCU_XY).is_some_and(|s| s.max == 1));
}

#[test]
fn test_live_refresh_and_count_rate() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.acquisition_start().unwrap();
    let events = controller.subscribe();
    sim.inject(&[(10, 10, 0), (10, 10, 0), (40, 40, 5)]);

    controller.tick_at(Instant::now() + Duration::from_secs(2));
    controller.wait_idle();

    let stats = controller.image_statistics(LIVE_XY).unwrap();
    assert_eq!(stats.max, 2);
    assert_eq!(sum(&controller, LIVE_XY), 0);
    assert!(controller.counts_per_second() > 0.0);
    assert!(events.try_iter().any(|e| matches!(
        e,
        ControllerEvent::FrameUpdated { ref name, .. } if name == LIVE_XY
    )));
}

#[test]
fn test_shrink_refused_while_acquiring() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.acquisition_start().unwrap();
    assert!(!controller.shrink_buffers());
    controller.acquisition_stop();
    sim.complete(CompletionReason::UserInterrupt);
    assert!(!controller.is_acquiring());
    assert!(controller.shrink_buffers());
    assert!(controller.registry().lock(LIVE_XY).unwrap().has_buffer());
    assert!(!controller.registry().lock(ACCU_XYT).unwrap().has_buffer());
}

#[test]
fn test_early_notification_ignored() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    controller.acquisition_start().unwrap();
    controller.handle_completion(CompletionReason::EarlyNotification);
    assert!(controller.is_acquiring());
    assert_eq!(sim.starts(), 1);
}

#[test]
fn test_saves() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        save_dir: dir.path().to_path_buf(),
        save_filename: "run one".to_string(),
        ..ControllerConfig::default()
    };
    let (controller, sim) = controller_with(config);
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();
    sim.inject(&[(0, 0, 0), (2, 2, 0)]);
    controller.refresh_accumulation_views();
    let events = controller.subscribe();

    assert!(controller.save_xy_text());
    controller.wait_idle();
    let saved: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            ControllerEvent::Saved { path } => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].ends_with("000_run_one_XY.dat"));
    let info = saved[0].with_file_name("000_run_one_XY_info.txt");
    assert!(info.exists());

    // never overwrites
    assert!(controller.save_xy_text());
    controller.wait_idle();
    assert!(events
        .try_iter()
        .any(|e| matches!(e, ControllerEvent::Message(_))));

    let spectrum = controller.save_spectrum().unwrap();
    assert!(spectrum.to_string_lossy().ends_with("_t1.txt"));
    assert!(controller.save_spectrum().is_err());

    // a new accumulation moves to the next number once something was saved
    controller.accumulation_stop();
    sim.complete(CompletionReason::UserInterrupt);
    controller.accumulation_start().unwrap();
    assert_eq!(controller.file_counter(), 1);
}

fn save_spectrum_with(dir: &Path, counter: Option<u32>) -> Result<PathBuf, Error> {
    let config = ControllerConfig {
        save_dir: dir.to_path_buf(),
        file_counter: counter.unwrap_or(0),
        ..ControllerConfig::default()
    };
    let (controller, sim) = controller_with(config);
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();
    sim.inject(&[(0, 0, 0)]);
    controller.refresh_accumulation_views();
    controller.save_spectrum()
}

#[test]
fn test_preset_file_counter_names_next_save() {
    let dir = tempfile::tempdir().unwrap();
    let first = save_spectrum_with(dir.path(), None).unwrap();
    assert!(first.ends_with("000_measurement_t1.txt"));

    // a fresh controller starting at 000 collides with the earlier run
    assert!(save_spectrum_with(dir.path(), None).is_err());

    let second = save_spectrum_with(dir.path(), Some(1)).unwrap();
    assert!(second.ends_with("001_measurement_t1.txt"));
    assert_eq!(first.parent(), second.parent());

    let (controller, sim) = controller_with(ControllerConfig {
        save_dir: dir.path().to_path_buf(),
        ..ControllerConfig::default()
    });
    controller.set_file_counter(1002);
    assert_eq!(controller.file_counter(), 2);
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();
    sim.inject(&[(0, 0, 0)]);
    controller.refresh_accumulation_views();
    let third = controller.save_spectrum().unwrap();
    assert!(third.ends_with("002_measurement_t1.txt"));
}

fn spectrum_units(controller: &AcquisitionController) -> Vec<Option<TimeUnit>> {
    [FULL_T, LIVE_T, ACCU_T, USER_T]
        .iter()
        .map(|name| {
            controller
                .registry()
                .lock(name)
                .unwrap()
                .time_axis()
                .map(|axis| axis.unit)
        })
        .collect()
}

#[test]
fn test_time_axis_unit_changes_at_runtime() {
    let (controller, _sim) = controller();
    controller.set_time_axis_unit(TimeUnit::Micros);
    assert_eq!(spectrum_units(&controller), vec![None; 4]);

    controller.bind().unwrap();
    controller.tick_at(Instant::now() + Duration::from_secs(2));
    controller.wait_idle();
    assert_eq!(spectrum_units(&controller), vec![Some(TimeUnit::Micros); 4]);

    controller.set_time_axis_unit(TimeUnit::Nanos);
    assert_eq!(controller.time_axis_unit(), TimeUnit::Nanos);
    assert_eq!(spectrum_units(&controller), vec![Some(TimeUnit::Nanos); 4]);

    assert_eq!(controller.set_time_axis_unit_by_name("ms"), TimeUnit::Millis);
    assert_eq!(spectrum_units(&controller), vec![Some(TimeUnit::Millis); 4]);
    assert_eq!(controller.set_time_axis_unit_by_name("fortnights"), TimeUnit::Pixels);
    assert_eq!(spectrum_units(&controller), vec![Some(TimeUnit::Pixels); 4]);
}

#[test]
fn test_common_shift_requires_binding() {
    let (controller, sim) = controller();
    assert!(matches!(controller.set_common_shift(5), Err(Error::NotBound)));
    controller.bind().unwrap();
    controller.set_common_shift(-12).unwrap();
    assert_eq!(sim.common_shift(), -12);
}

#[test]
fn test_unbind_survives_failed_pipe_close() {
    let (controller, sim) = controller();
    controller.bind().unwrap();
    sim.fail_next_close();
    controller.unbind().unwrap();
    assert_eq!(controller.state(), ControllerState::Unbound);
    assert_eq!(controller.device_state(), DeviceState::Off);
    assert!(!sim.is_initialized());
    assert_eq!(sim.open_pipes(), 0);
}

#[cfg(feature = "hdf5")]
#[test]
fn test_cube_hdf5_save() {
    let dir = tempfile::tempdir().unwrap();
    let config = ControllerConfig {
        save_dir: dir.path().to_path_buf(),
        ..ControllerConfig::default()
    };
    let (controller, sim) = controller_with(config);
    controller.bind().unwrap();
    controller.accumulation_start().unwrap();
    sim.inject(&[(0, 0, 0), (8, 8, 0), (8, 8, CUBE_BINT)]);
    let events = controller.subscribe();
    assert!(controller.save_cube_hdf5());
    controller.wait_idle();
    let path = events
        .try_iter()
        .find_map(|e| match e {
            ControllerEvent::Saved { path } => Some(path),
            _ => None,
        })
        .unwrap();
    assert!(path.ends_with("000_measurement.h5"));
    assert!(path.with_file_name("000_measurement_info.txt").exists());
    let cube = tdcpix_io::read_cube_hdf5(&path).unwrap();
    assert_eq!(cube.shape, [4, 8, 8]);
    assert_eq!(cube.counts.iter().sum::<u32>(), 3);
}

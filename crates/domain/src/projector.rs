//! Projection from raw printer status onto [`CanonicalStatus`].
//!
//! Label derivation is a pure table lookup:
//!
//! - machine codes (`CurrentStatus[0]`) and job codes (`PrintInfo.Status`)
//!   map through fixed tables, unknown codes become `UNKNOWN`;
//! - a few job codes that mean "getting ready" collapse to `LOADING`;
//! - job code 13 (print resumed after power loss) always reads as
//!   `PRINTING`, whatever the machine code says.

use chrono::{DateTime, Utc};
use pr_protocol::PrinterStatus;

use crate::status::{CanonicalStatus, CodedState, StatusLabel};

/// Job code reported while a print resumes after an interruption.
pub const JOB_PRINTING_RECOVERY: i64 = 13;

/// Job codes shown as `LOADING`: homing, file check, heating, auto-leveling.
pub const LOADING_JOB_CODES: [i64; 4] = [1, 10, 16, 20];

/// Labels derived from one pair of machine/job codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub consolidated: StatusLabel,
    pub machine: CodedState,
    pub job: CodedState,
}

pub fn machine_label(code: Option<i64>) -> StatusLabel {
    match code {
        Some(0) => StatusLabel::Idle,
        Some(1) => StatusLabel::Printing,
        Some(2) => StatusLabel::FileTransfer,
        Some(3) => StatusLabel::Calibrating,
        Some(4) => StatusLabel::SelfTest,
        Some(5) => StatusLabel::Error,
        _ => StatusLabel::Unknown,
    }
}

pub fn job_label(code: Option<i64>) -> StatusLabel {
    let Some(code) = code else {
        return StatusLabel::Unknown;
    };
    if LOADING_JOB_CODES.contains(&code) {
        return StatusLabel::Loading;
    }
    match code {
        0 => StatusLabel::Idle,
        2..=4 | JOB_PRINTING_RECOVERY => StatusLabel::Printing,
        5 => StatusLabel::Pausing,
        6 => StatusLabel::Paused,
        7 => StatusLabel::Stopping,
        8 => StatusLabel::Stopped,
        9 => StatusLabel::Completed,
        _ => StatusLabel::Unknown,
    }
}

/// Derive all three labels from a machine/job code pair.
pub fn project_codes(machine_code: Option<i64>, job_code: Option<i64>) -> Projection {
    let machine = machine_label(machine_code);
    let job = job_label(job_code);

    let consolidated = if job_code == Some(JOB_PRINTING_RECOVERY) {
        StatusLabel::Printing
    } else if machine == StatusLabel::Printing {
        // While printing, the job view is the more precise one.
        match job {
            StatusLabel::Unknown | StatusLabel::Idle => StatusLabel::Printing,
            other => other,
        }
    } else {
        machine
    };

    Projection {
        consolidated,
        machine: CodedState {
            state: machine,
            code: machine_code,
        },
        job: CodedState {
            state: job,
            code: job_code,
        },
    }
}

/// Derive labels from a raw payload alone.
pub fn project(raw: &PrinterStatus) -> Projection {
    project_codes(raw.machine_code(), raw.job_code())
}

/// Patch `status` with whatever `raw` carries.
///
/// Codes missing from a partial push fall back to the last known codes so
/// a temperature-only update does not blank the state.  An `UNKNOWN`
/// consolidated label never replaces a known one.
pub fn apply_payload(status: &mut CanonicalStatus, raw: &PrinterStatus, now: DateTime<Utc>) {
    let machine_code = raw.machine_code().or(status.status.machine.code);
    let job_code = raw.job_code().or(status.status.job.code);
    let projection = project_codes(machine_code, job_code);

    status.status.machine = projection.machine;
    status.status.job = projection.job;
    status.set_consolidated(projection.consolidated);

    if let Some(info) = &raw.print_info {
        if let Some(progress) = info.progress {
            status.progress = progress.clamp(0.0, 100.0);
        }
        if let Some(layer) = info.current_layer {
            status.layers.current = layer;
        }
        if let Some(total) = info.total_layer {
            status.layers.total = total;
        }
        if let Some(elapsed) = info.current_ticks {
            status.print_time_seconds = whole_seconds(elapsed);
        }
        if let Some(total) = info.total_ticks {
            let elapsed = info
                .current_ticks
                .map_or(status.print_time_seconds, whole_seconds);
            status.remaining_time_seconds = whole_seconds(total).saturating_sub(elapsed);
        }
    }

    let temps = &mut status.temperatures;
    patch(&mut temps.bed.current, raw.temp_of_hotbed);
    patch(&mut temps.bed.target, raw.temp_target_hotbed);
    patch(&mut temps.nozzle.current, raw.temp_of_nozzle);
    patch(&mut temps.nozzle.target, raw.temp_target_nozzle);
    patch(&mut temps.enclosure.current, raw.temp_of_box);
    patch(&mut temps.enclosure.target, raw.temp_target_box);

    status.last_update = now;
}

fn patch(slot: &mut f64, value: Option<f64>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        *slot = v;
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_seconds(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pr_protocol::PrintInfo;

    fn raw(machine: Option<i64>, job: Option<i64>) -> PrinterStatus {
        PrinterStatus {
            current_status: machine.map(|m| vec![m]),
            print_info: job.map(|j| PrintInfo {
                status: Some(j),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn printing_recovery_reads_as_printing_everywhere() {
        let p = project(&raw(Some(1), Some(13)));
        assert_eq!(p.consolidated, StatusLabel::Printing);
        assert_eq!(p.machine.state, StatusLabel::Printing);
        assert_eq!(p.job.state, StatusLabel::Printing);
        assert_eq!(p.job.code, Some(13));
    }

    #[test]
    fn printing_recovery_overrides_machine_label() {
        for machine in [None, Some(0), Some(2), Some(5), Some(99)] {
            let p = project(&raw(machine, Some(JOB_PRINTING_RECOVERY)));
            assert_eq!(p.consolidated, StatusLabel::Printing, "machine {machine:?}");
        }
    }

    #[test]
    fn loading_codes_are_special_cased() {
        for code in LOADING_JOB_CODES {
            assert_eq!(job_label(Some(code)), StatusLabel::Loading);
            let p = project(&raw(Some(1), Some(code)));
            assert_eq!(p.consolidated, StatusLabel::Loading);
        }
    }

    #[test]
    fn unknown_codes_map_to_unknown() {
        assert_eq!(machine_label(Some(42)), StatusLabel::Unknown);
        assert_eq!(machine_label(None), StatusLabel::Unknown);
        assert_eq!(job_label(Some(-1)), StatusLabel::Unknown);
        let p = project(&raw(Some(42), Some(77)));
        assert_eq!(p.consolidated, StatusLabel::Unknown);
    }

    #[test]
    fn job_state_refines_printing_machine() {
        assert_eq!(project(&raw(Some(1), Some(6))).consolidated, StatusLabel::Paused);
        assert_eq!(project(&raw(Some(1), Some(9))).consolidated, StatusLabel::Completed);
        assert_eq!(project(&raw(Some(1), Some(0))).consolidated, StatusLabel::Printing);
        assert_eq!(project(&raw(Some(0), Some(9))).consolidated, StatusLabel::Idle);
    }

    #[test]
    fn unmappable_updates_never_regress_consolidated() {
        let now = Utc::now();
        let mut status = CanonicalStatus::disconnected(now);
        apply_payload(&mut status, &raw(Some(1), Some(3)), now);
        assert_eq!(status.status.consolidated, StatusLabel::Printing);

        for (m, j) in [(Some(42), Some(77)), (Some(99), None), (Some(-3), Some(500))] {
            apply_payload(&mut status, &raw(m, j), now);
            assert_eq!(status.status.consolidated, StatusLabel::Printing);
        }
        assert_eq!(status.status.machine.state, StatusLabel::Unknown);
    }

    #[test]
    fn partial_push_keeps_known_codes() {
        let now = Utc::now();
        let mut status = CanonicalStatus::disconnected(now);
        apply_payload(&mut status, &raw(Some(1), Some(6)), now);

        let temps_only = PrinterStatus {
            temp_of_nozzle: Some(215.5),
            temp_target_nozzle: Some(220.0),
            ..Default::default()
        };
        apply_payload(&mut status, &temps_only, now);
        assert_eq!(status.status.job.code, Some(6));
        assert_eq!(status.status.consolidated, StatusLabel::Paused);
        assert!((status.temperatures.nozzle.current - 215.5).abs() < f64::EPSILON);
        assert!((status.temperatures.nozzle.target - 220.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_time_and_layers_are_patched() {
        let now = Utc::now();
        let mut status = CanonicalStatus::disconnected(now);
        let payload = PrinterStatus {
            print_info: Some(PrintInfo {
                status: Some(3),
                current_layer: Some(12),
                total_layer: Some(240),
                current_ticks: Some(600.4),
                total_ticks: Some(3600.0),
                progress: Some(140.0),
                filename: Some("benchy.gcode".into()),
            }),
            temp_of_hotbed: Some(60.0),
            temp_of_box: Some(f64::NAN),
            ..Default::default()
        };
        apply_payload(&mut status, &payload, now);
        assert_eq!(status.layers.current, 12);
        assert_eq!(status.layers.total, 240);
        assert_eq!(status.print_time_seconds, 600);
        assert_eq!(status.remaining_time_seconds, 3000);
        assert!((status.progress - 100.0).abs() < f64::EPSILON);
        assert!((status.temperatures.bed.current - 60.0).abs() < f64::EPSILON);
        assert!((status.temperatures.enclosure.current).abs() < f64::EPSILON);
    }

    #[test]
    fn remaining_time_never_negative() {
        let now = Utc::now();
        let mut status = CanonicalStatus::disconnected(now);
        let payload = PrinterStatus {
            print_info: Some(PrintInfo {
                current_ticks: Some(500.0),
                total_ticks: Some(100.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        apply_payload(&mut status, &payload, now);
        assert_eq!(status.remaining_time_seconds, 0);
    }
}

//! End-to-end fusion runs over synthetic survey directories.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tempfile::TempDir;

use echogrid::processors::finalize::{FLAG_GOOD, FLAG_UNSET};
use echogrid::{run_survey, ChannelConfig, ContinuityWarning, FusionConfig, QualityConfig};

/// Write an export table with 4 layers spanning 0..40 m.
fn write_table(path: &Path, times: &[&str], mut value: impl FnMut(usize, usize) -> f64) {
    let mut f = File::create(path).unwrap();
    writeln!(
        f,
        "index,date,time,latitude,longitude,top_depth,bottom_depth,sample_count,v1,v2,v3,v4"
    )
    .unwrap();
    for (i, t) in times.iter().enumerate() {
        let lat = 56.0 + i as f64 * 0.01;
        let lon = -152.0 - i as f64 * 0.01;
        write!(f, "{},2019-07-14,{},{},{},0.0,40.0,4", i, t, lat, lon).unwrap();
        for layer in 0..4 {
            write!(f, ",{}", value(i, layer)).unwrap();
        }
        writeln!(f).unwrap();
    }
}

fn write_intervals(path: &Path, times: &[&str], intervals: &[u32]) {
    let mut f = File::create(path).unwrap();
    writeln!(f, "date,time,interval,exclude").unwrap();
    for (t, i) in times.iter().zip(intervals) {
        writeln!(f, "2019-07-14,{},{},0", t, i).unwrap();
    }
}

fn write_noise(path: &Path, intervals: &[u32], value: f64) {
    let mut f = File::create(path).unwrap();
    writeln!(f, "interval,noise").unwrap();
    for i in intervals {
        writeln!(f, "{},{}", i, value).unwrap();
    }
}

fn two_channel_config() -> FusionConfig {
    FusionConfig {
        channels: vec![
            ChannelConfig::new("38kHz", 38.0),
            ChannelConfig::new("120kHz", 120.0),
        ],
        quality: QualityConfig {
            min_percent_good: 50.0,
            min_good_cells: 1,
        },
        ..Default::default()
    }
}

#[test]
fn quality_gate_and_flags_through_full_pipeline() {
    let dir = TempDir::new().unwrap();
    let times = ["12:00:00.000", "12:00:01.000", "12:00:02.000"];
    let intervals = [100u32, 101, 102];

    for chan in ["38kHz", "120kHz"] {
        let name = |kind: &str| dir.path().join(format!("leg1_{}_{}.csv", chan, kind));

        write_table(&name("sv"), &times, |_, _| -70.0);
        write_intervals(&name("intervals"), &times, &intervals);
        write_table(&name("raw_count"), &times, |_, _| 10.0);
        // One 10%-good cell in the 38 kHz channel; 80% everywhere else.
        let low_cell = chan == "38kHz";
        write_table(&name("kept_count"), &times, move |i, layer| {
            if low_cell && i == 0 && layer == 0 {
                1.0
            } else {
                8.0
            }
        });
    }
    write_noise(
        &dir.path().join("leg1_38kHz_noise.csv"),
        &intervals,
        -125.0,
    );

    let config = two_channel_config();
    let (survey, warnings) = run_survey(dir.path(), &config).unwrap();

    assert_eq!(survey.channels.len(), 2);
    assert_eq!(survey.time.len(), 3);
    assert_eq!(survey.depth.len(), 4);
    assert_eq!(survey.depth, vec![5.0, 15.0, 25.0, 35.0]);
    assert!(warnings.is_empty());

    // Interval numbering restored from the index table.
    let slots: Vec<u32> = survey.time.iter().map(|s| s.interval).collect();
    assert_eq!(slots, vec![100, 101, 102]);

    let expected_sv = 10f64.powf(-7.0);
    for c in 0..2 {
        for t in 0..3 {
            for d in 0..4 {
                let dropped = c == 0 && t == 0 && d == 0;
                let sv = survey.fields.sv_mean.get(c, t, d);
                let flag = survey.flags[c][t][d];
                if dropped {
                    // The 10%-good cell never reached the grid.
                    assert!(sv.is_nan());
                    assert_eq!(flag, FLAG_UNSET);
                } else {
                    assert!((sv - expected_sv).abs() < 1e-18);
                    assert_eq!(survey.fields.percent_good.get(c, t, d), 80.0);
                    assert_eq!(flag, FLAG_GOOD);
                }
            }
        }
    }

    // Background noise landed per interval on the 38 kHz channel only.
    for t in 0..3 {
        assert_eq!(survey.noise[0][t], -125.0);
        assert!(survey.noise[1][t].is_nan());
    }

    assert_eq!(survey.good_cell_count(), 23);
    assert_eq!(survey.bounds.time_start.unwrap().to_string(), "2019-07-14 12:00:00");
    assert_eq!(survey.bounds.latitude_min, 56.0);
}

#[test]
fn gap_between_file_sets_warns_without_filling() {
    let dir = TempDir::new().unwrap();

    let leg1_times = ["12:00:00.000", "12:00:01.000"];
    let leg2_times = ["12:10:00.000", "12:10:01.000"];

    let name = |set: &str, kind: &str| dir.path().join(format!("{}_38kHz_{}.csv", set, kind));
    write_table(&name("leg1", "sv"), &leg1_times, |_, _| -70.0);
    write_intervals(&name("leg1", "intervals"), &leg1_times, &[10, 11]);
    write_table(&name("leg2", "sv"), &leg2_times, |_, _| -60.0);
    write_intervals(&name("leg2", "intervals"), &leg2_times, &[20, 21]);

    let config = FusionConfig {
        channels: vec![ChannelConfig::new("38kHz", 38.0)],
        ..Default::default()
    };
    let (survey, warnings) = run_survey(dir.path(), &config).unwrap();

    let slots: Vec<u32> = survey.time.iter().map(|s| s.interval).collect();
    assert_eq!(slots, vec![10, 11, 20, 21]);

    assert!(warnings.warnings().any(|w| matches!(
        w,
        ContinuityWarning::IntervalGap {
            first_missing: 12,
            last_missing: 19,
        }
    )));
}

#[test]
fn overlapping_file_sets_are_trimmed_through_full_pipeline() {
    let dir = TempDir::new().unwrap();

    let leg1_times = ["12:00:00.000", "12:00:01.000", "12:00:02.000"];
    let leg2_times = ["12:00:02.000", "12:00:03.000", "12:00:04.000"];

    let name = |set: &str, kind: &str| dir.path().join(format!("{}_38kHz_{}.csv", set, kind));
    write_table(&name("leg1", "sv"), &leg1_times, |_, _| -70.0);
    write_intervals(&name("leg1", "intervals"), &leg1_times, &[10, 11, 12]);
    write_table(&name("leg2", "sv"), &leg2_times, |_, _| -60.0);
    write_intervals(&name("leg2", "intervals"), &leg2_times, &[12, 13, 14]);

    let config = FusionConfig {
        channels: vec![ChannelConfig::new("38kHz", 38.0)],
        ..Default::default()
    };
    let (survey, _warnings) = run_survey(dir.path(), &config).unwrap();

    // One slot per interval; the shared boundary interval appears once.
    let slots: Vec<u32> = survey.time.iter().map(|s| s.interval).collect();
    assert_eq!(slots, vec![10, 11, 12, 13, 14]);

    // The boundary interval's data comes from the second batch.
    let boundary = 10f64.powf(-6.0);
    assert!((survey.fields.sv_mean.get(0, 2, 0) - boundary).abs() < 1e-18);
}

use std::fs::File;
use std::io::Write;

use claire_config::{
    CalibrationCsvWriter, CalibrationSample, load_calibration_csv, load_rainfall_timeline,
};
use rstest::rstest;
use tempfile::tempdir;

fn sample(tube: u8, is_inflow: bool, duty: u8) -> CalibrationSample {
    let duration_s = 100.0;
    let difference_mm = if is_inflow { 250.5 } else { -249.5 };
    CalibrationSample {
        tube,
        is_inflow,
        duration_s,
        difference_mm,
        rate_mm_per_s: difference_mm / duration_s,
        duty,
    }
}

#[rstest]
fn written_csv_loads_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calibration_data.csv");
    {
        let mut w = CalibrationCsvWriter::create(&path).unwrap();
        w.write(&sample(1, true, 10)).unwrap();
        w.write(&sample(1, false, 10)).unwrap();
        w.write(&sample(2, true, 20)).unwrap();
    }
    let rows = load_calibration_csv(&path).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1], sample(1, false, 10));
    assert!((rows[2].rate_mm_per_s - 2.505).abs() < 1e-12);
}

#[rstest]
fn rejects_legacy_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("legacy.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "Tube,isInflow,duration[s],difference[mm],rate[mm/s],duty").unwrap();
    writeln!(f, "1,True,100,250,2.5,10").unwrap();
    let err = load_calibration_csv(&path).expect_err("legacy header");
    assert!(format!("{err}").contains("calibration CSV must have headers"));
}

#[rstest]
fn reports_bad_row_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "tube,isInflow,duration_s,difference_mm,rate_mm_per_s,duty").unwrap();
    writeln!(f, "1,true,100,250,2.5,10").unwrap();
    writeln!(f, "1,maybe,100,250,2.5,10").unwrap();
    let err = load_calibration_csv(&path).expect_err("bad bool");
    assert!(format!("{err}").contains("invalid CSV row 3"));
}

#[rstest]
#[case("1.0\n0.25\n", Some(vec![1.0, 0.25]))]
#[case("1.0\n-0.5\n", None)]
#[case("1.0\nheavy\n", None)]
fn rainfall_timeline_files(#[case] text: &str, #[case] expected: Option<Vec<f64>>) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Rainfall.txt");
    std::fs::write(&path, text).unwrap();
    let res = load_rainfall_timeline(&path);
    match expected {
        Some(v) => assert_eq!(res.unwrap(), v),
        None => assert!(res.is_err()),
    }
}

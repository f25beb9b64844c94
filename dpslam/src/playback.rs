//! Sensor log record and playback.
//!
//! The format is line oriented text, alternating odometry and laser
//! records:
//!
//! ```text
//! Odometry <x> <y> <theta>
//! Laser <n> <d_0> <d_1> ... <d_{n-1}>
//! ```
//!
//! Positions and distances are in meters (grid distances divided by the
//! map scale), angles in radians. Playing a log back with the same seed
//! reproduces a run byte for byte.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, space1};
use nom::combinator::map_res;
use nom::multi::many_m_n;
use nom::number::complete::double;
use nom::sequence::preceded;
use nom::IResult;

use localizer::filter::{Beam, Pose, Scan};

/// One playback record: where the odometry thinks the robot is, and the
/// raw ranges it saw from there.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub odometry: Pose,
    pub ranges: Vec<f64>,
}

fn odometry_line(input: &str) -> IResult<&str, Pose> {
    let (input, _) = tag("Odometry")(input)?;
    let (input, x) = preceded(space1, double)(input)?;
    let (input, y) = preceded(space1, double)(input)?;
    let (input, theta) = preceded(space1, double)(input)?;
    Ok((input, Pose { x, y, theta }))
}

fn laser_line(input: &str) -> IResult<&str, Vec<f64>> {
    let (input, _) = tag("Laser")(input)?;
    let (input, count) = preceded(space1, map_res(digit1, str::parse::<usize>))(input)?;
    many_m_n(count, count, preceded(space1, double))(input)
}

fn malformed(line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed log line: {:?}", line),
    )
}

pub struct LogReader {
    lines: io::Lines<BufReader<File>>,
}

impl LogReader {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }

    fn next_data_line(&mut self) -> io::Result<Option<String>> {
        for line in &mut self.lines {
            let line = line?;
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    /// The next odometry/laser pair, or `None` at a clean end of log.
    pub fn next_record(&mut self) -> io::Result<Option<LogRecord>> {
        let line = match self.next_data_line()? {
            Some(line) => line,
            None => return Ok(None),
        };
        let odometry = odometry_line(&line).map_err(|_| malformed(&line))?.1;

        let line = match self.next_data_line()? {
            Some(line) => line,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "odometry record with no laser record after it",
                ))
            }
        };
        let ranges = laser_line(&line).map_err(|_| malformed(&line))?.1;

        Ok(Some(LogRecord { odometry, ranges }))
    }
}

pub struct LogWriter {
    out: BufWriter<File>,
}

impl LogWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }

    pub fn write_record(&mut self, record: &LogRecord) -> io::Result<()> {
        writeln!(
            self.out,
            "Odometry {:.6} {:.6} {:.6} ",
            record.odometry.x, record.odometry.y, record.odometry.theta
        )?;
        writeln!(
            self.out,
            "Laser {} {} ",
            record.ranges.len(),
            record.ranges.iter().map(|d| format!("{:.6}", d)).join(" ")
        )?;
        self.out.flush()
    }
}

/// Turn raw ranges into a scan in grid units. Beams are assumed evenly
/// spread over the front 180 degrees, center beam straight ahead.
pub fn scan_from_ranges(ranges: &[f64], map_scale: f64) -> Scan {
    let n = ranges.len();
    ranges
        .iter()
        .enumerate()
        .map(|(i, &distance)| Beam {
            theta: if n > 1 {
                (i as f64 * 180.0 / (n - 1) as f64 - 90.0).to_radians()
            } else {
                0.0
            },
            distance: distance * map_scale,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_a_record_pair() {
        let mut path = std::env::temp_dir();
        path.push("dpslam-playback-parse.log");
        std::fs::write(
            &path,
            "Odometry 1.250000 -0.500000 0.120000 \nLaser 5 2.0 2.1 2.2 8.0 8.0 \n",
        )
        .unwrap();

        let mut reader = LogReader::open(&path).unwrap();
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.odometry, Pose { x: 1.25, y: -0.5, theta: 0.12 });
        assert_eq!(record.ranges.len(), 5);
        assert_eq!(record.ranges[3], 8.0);

        assert!(reader.next_record().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut path = std::env::temp_dir();
        path.push("dpslam-playback-roundtrip.log");

        let records = vec![
            LogRecord {
                odometry: Pose { x: 0.0, y: 0.0, theta: 0.001 },
                ranges: vec![1.5, 2.5, 3.5],
            },
            LogRecord {
                odometry: Pose { x: 0.25, y: 0.0, theta: 0.002 },
                ranges: vec![1.4, 2.4, 3.4],
            },
        ];
        {
            let mut writer = LogWriter::create(&path).unwrap();
            for record in &records {
                writer.write_record(record).unwrap();
            }
        }

        let mut reader = LogReader::open(&path).unwrap();
        for expected in &records {
            let read = reader.next_record().unwrap().unwrap();
            assert_eq!(&read, expected);
        }
        assert!(reader.next_record().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_log_is_an_error_not_a_panic() {
        let mut path = std::env::temp_dir();
        path.push("dpslam-playback-truncated.log");
        std::fs::write(&path, "Odometry 1.0 2.0 3.0 \n").unwrap();

        let mut reader = LogReader::open(&path).unwrap();
        assert!(reader.next_record().is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn playback_with_one_seed_gives_identical_maps() {
        use dpmap::map::MapConfig;
        use localizer::filter::{Hierarchy, LevelConfig, MotionDelta};
        use localizer::progress::SilentProgress;

        let mut path = std::env::temp_dir();
        path.push("dpslam-playback-determinism.log");
        {
            let mut writer = LogWriter::create(&path).unwrap();
            for i in 0..6 {
                writer
                    .write_record(&LogRecord {
                        odometry: Pose {
                            x: 0.05 * i as f64,
                            y: 0.0,
                            theta: 0.001 + 0.01 * i as f64,
                        },
                        ranges: vec![2.0, 2.5, 8.0, 2.5, 2.0],
                    })
                    .unwrap();
            }
        }

        let config = || {
            // A coarse scale keeps the 8 m no-return beams inside the
            // small test grid.
            let map = MapConfig {
                width: 300,
                height: 300,
                id_limit: 64,
                map_scale: 3.0,
                max_sense_range: 7.95 * 3.0,
                prior_dist: 1.0,
                variance: 0.5,
            };
            LevelConfig {
                start: Pose { x: 150.0, y: 150.0, theta: 0.001 },
                map,
                particles: 5,
                samples: 12,
                sense_number: 5,
                turn_radius: 0.32 * 3.0,
                scatter_xy: 0.5,
                scatter_theta: 0.02,
                thresh: 12.0,
                passes: 3,
                video: 0,
            }
        };

        let run = |seed: u64| {
            let scale = config().map.map_scale;
            let turn_radius_m = config().turn_radius / scale;
            let mut hierarchy = Hierarchy::new(config(), config(), 3, seed);
            let mut reader = LogReader::open(&path).unwrap();
            let mut previous: Option<Pose> = None;
            while let Some(record) = reader.next_record().unwrap() {
                let motion = match previous {
                    Some(prev) => MotionDelta::between(&prev, &record.odometry, turn_radius_m)
                        .scaled(scale),
                    None => MotionDelta::zero(),
                };
                previous = Some(record.odometry);
                let scan = scan_from_ranges(&record.ranges, scale);
                hierarchy.observe(motion, scan, &SilentProgress);
            }
            hierarchy.snapshot()
        };

        let first = run(1);
        let second = run(1);

        let mut ppm_a = std::env::temp_dir();
        ppm_a.push("dpslam-determinism-a.ppm");
        let mut ppm_b = std::env::temp_dir();
        ppm_b.push("dpslam-determinism-b.ppm");
        crate::render::write_ppm(&ppm_a, &first).unwrap();
        crate::render::write_ppm(&ppm_b, &second).unwrap();
        assert_eq!(
            std::fs::read(&ppm_a).unwrap(),
            std::fs::read(&ppm_b).unwrap(),
            "two runs over the same log and seed must dump identical maps"
        );

        std::fs::remove_file(&path).ok();
        std::fs::remove_file(&ppm_a).ok();
        std::fs::remove_file(&ppm_b).ok();
    }

    #[test]
    fn scans_spread_over_the_front_arc() {
        let scan = scan_from_ranges(&[1.0, 2.0, 3.0], 35.0);
        assert!((scan[0].theta + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!(scan[1].theta.abs() < 1e-12);
        assert!((scan[2].theta - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(scan[1].distance, 70.0);
    }
}

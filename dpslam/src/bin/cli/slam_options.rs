use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Clone, StructOpt)]
#[structopt(
name = "dpslam",
about = "Hierarchical particle filter SLAM over distributed particle maps."
)]
pub struct SlamOptions {
    #[structopt(short = "R")]
    /// Record the sensor stream to current.log.
    pub record_default: bool,

    #[structopt(short = "r", long = "record")]
    /// Record the sensor stream to the given file.
    pub record: Option<PathBuf>,

    #[structopt(short = "P")]
    /// Play back current.log instead of talking to hardware.
    pub playback_default: bool,

    #[structopt(short = "p", long = "playback")]
    /// Play back the given log file instead of talking to hardware.
    /// Hardware initialization is skipped entirely.
    pub playback: Option<PathBuf>,

    #[structopt(long = "seed", default_value = "1")]
    /// Seed for the filter's random draws. Identical log and seed give a
    /// byte-identical run.
    pub seed: u64,

    #[structopt(short = "o", long = "out", default_value = ".")]
    /// Folder for the per-interval map images.
    pub out: PathBuf,
}

impl SlamOptions {
    pub fn playback_path(&self) -> Option<PathBuf> {
        self.playback.clone().or_else(|| {
            if self.playback_default {
                Some(PathBuf::from("current.log"))
            } else {
                None
            }
        })
    }

    pub fn record_path(&self) -> Option<PathBuf> {
        self.record.clone().or_else(|| {
            if self.record_default {
                Some(PathBuf::from("current.log"))
            } else {
                None
            }
        })
    }
}

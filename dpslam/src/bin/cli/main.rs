use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use console::style;
use structopt::StructOpt;

use dpmap::map::MapImage;
use dpslam::hardware;
use dpslam::playback::{scan_from_ranges, LogReader, LogWriter};
use dpslam::progress::Progress;
use dpslam::render::write_ppm;
use localizer::filter::{Hierarchy, LevelConfig, MotionDelta, Pose, LOW_DURATION};
use localizer::progress::SlamProgress;

use slam_options::SlamOptions;

mod slam_options;

fn main() {
    let options = SlamOptions::from_args();

    eprintln!("{}", style("********** Hierarchical SLAM **************").bold());
    let playback = match options.playback_path() {
        Some(path) => path,
        None => {
            if let Err(cause) = hardware::initialize() {
                eprintln!("Start up initialization of the robot has failed: {}", cause);
                std::process::exit(-1);
            }
            // The stub drivers connect to nothing; without a log there is
            // no data to consume.
            eprintln!("No data source configured; nothing to do.");
            return;
        }
    };

    eprintln!("{}", style("********** World Initialization ***********").bold());
    let progress = Progress::new();
    let main_bar = progress.new_main_spinner();
    main_bar.set_message(&format!("SLAM from {}", playback.display()));
    main_bar.enable_steady_tick(1000);
    drive_progress(progress.clone());

    // Snapshot-on-demand seam for any outside reader (a UI, say): the
    // SLAM thread publishes an immutable image at interval boundaries and
    // never hands out its live map.
    let snapshot: Arc<Mutex<Option<MapImage>>> = Arc::new(Mutex::new(None));

    let published = Arc::clone(&snapshot);
    let record = options.record_path();
    let seed = options.seed;
    let out = options.out.clone();
    let slam_thread = thread::spawn(move || {
        run_slam(&playback, record, seed, &out, published, main_bar);
    });

    slam_thread.join().expect("the SLAM thread died");
    //  Allow the progress display to settle before the final printout.
    thread::sleep(Duration::from_secs(1));
}

/// Drives the progress display. Not calling this may result in deadlocks.
/// See progress.rs for more.
fn drive_progress(progress: Progress) {
    let _ = thread::spawn(move || {
        progress.join();
    });
}

/// The dedicated SLAM thread: owns every map, consumes the playback in
/// arrival order, applies each interval atomically, publishes snapshots.
fn run_slam<F: SlamProgress>(
    playback: &Path,
    record: Option<PathBuf>,
    seed: u64,
    out: &Path,
    snapshot: Arc<Mutex<Option<MapImage>>>,
    progress: F,
) {
    let low = LevelConfig::low();
    let high = LevelConfig::high();
    let scale = low.map.map_scale;
    let turn_radius_m = low.turn_radius / scale;
    let video_low = low.video as i32;
    let video_high = high.video as i32;
    let sense_number = low.sense_number;

    let mut reader = match LogReader::open(playback) {
        Ok(reader) => reader,
        Err(cause) => {
            eprintln!("unable to open {}: {}", playback.display(), cause);
            return;
        }
    };
    let mut writer = record.and_then(|path| match LogWriter::create(&path) {
        Ok(writer) => Some(writer),
        Err(cause) => {
            eprintln!("unable to record to {}: {}", path.display(), cause);
            None
        }
    });

    let mut hierarchy = Hierarchy::new(low, high, LOW_DURATION, seed);
    let mut previous: Option<Pose> = None;
    let mut beam_count_warned = false;

    loop {
        let record = match reader.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(cause) => {
                eprintln!("playback stopped: {}", cause);
                break;
            }
        };
        if let Some(w) = writer.as_mut() {
            if let Err(cause) = w.write_record(&record) {
                eprintln!("recording failed, continuing without: {}", cause);
                writer = None;
            }
        }

        // Odometry arrives as absolute poses in meters; the filter wants
        // per-interval deltas in grid units.
        let motion = match previous {
            Some(prev) => {
                MotionDelta::between(&prev, &record.odometry, turn_radius_m).scaled(scale)
            }
            None => MotionDelta::zero(),
        };
        previous = Some(record.odometry);

        let scan = scan_from_ranges(&record.ranges, scale);
        if !beam_count_warned && scan.len() != sense_number {
            eprintln!(
                "log delivers {} beams per scan, configured for {}",
                scan.len(),
                sense_number
            );
            beam_count_warned = true;
        }

        let coarse_advanced = hierarchy.observe(motion, scan, &progress);
        progress.inc(1);

        *snapshot.lock().unwrap() = Some(hierarchy.snapshot());

        let generation = hierarchy.low().generation();
        if video_low != 0 && generation % video_low == 0 {
            let name = out.join(format!("map{:02}.ppm", generation / video_low));
            match write_ppm(&name, &hierarchy.low().map_image()) {
                Ok(()) => progress.println(&format!("Map dumped to {}", name.display())),
                Err(cause) => eprintln!("map dump failed: {}", cause),
            }
        }
        if coarse_advanced && video_high != 0 {
            let generation = hierarchy.high().generation();
            if generation % video_high == 0 {
                let name = out.join(format!("hmap{:02}.ppm", generation / video_high));
                match write_ppm(&name, &hierarchy.high().map_image()) {
                    Ok(()) => progress.println(&format!("High map dumped to {}", name.display())),
                    Err(cause) => eprintln!("high map dump failed: {}", cause),
                }
            }
        }
    }

    progress.finish_with_message("Playback complete.");
}

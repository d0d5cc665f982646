use std::cmp::max;
use std::io::{stdout, Write};
use std::time::Duration;

use crate::progress_message::Progress;

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;

// Print one progress event for the operator.
// Verbose also shows per-file upload lines.
pub fn show(progress: Progress, verbose: bool) {
    use Progress::*;
    let msg = match progress {
        Uploaded(filename, size) if verbose => {
            format!("Uploaded {filename} ({})", humanize(size))
        }
        Uploaded(..) => return,
        Copied(num_files, bytes, elapsed) => format!(
            "Copied {num_files} files, {} at {}.",
            humanize(bytes),
            humanize_speed(bytes, elapsed),
        ),
        Loading(filename) => format!("Loading data: {filename}"),
        Loaded(filename, elapsed) if verbose => {
            format!("Loaded {filename} in {}", humanize_duration(elapsed))
        }
        Loaded(..) => return,
        Finished(num_files, elapsed) => format!(
            "Finished loading {num_files} files in {}.",
            humanize_duration(elapsed)
        ),
    };
    let mut out = stdout();
    // nowhere left to report a broken stdout
    let _ = writeln!(out, "{msg}");
    let _ = out.flush();
}

fn humanize(size: u64) -> String {
    let fsize = size as f64;
    if fsize > MB {
        format!("{} MiB", (fsize / MB).round())
    } else if fsize > KB {
        format!("{} KiB", (fsize / KB).round())
    } else {
        format!("{size} bytes")
    }
}

fn humanize_speed(size: u64, time: Duration) -> String {
    let t = max(time.as_secs(), 1) as f64;
    let fsize = size as f64;
    if fsize > MB {
        format!("{:.2} MiB/s", (fsize / MB).round() / t)
    } else if fsize > KB {
        format!("{:.0} KiB/s", (fsize / KB).round() / t)
    } else {
        format!("{} B/s", fsize / t)
    }
}

fn humanize_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(512), "512 bytes");
        assert_eq!(humanize(3 * 1024), "3 KiB");
        assert_eq!(humanize(5 * 1024 * 1024), "5 MiB");
    }

    #[test]
    fn test_humanize_speed_floors_time_at_one_second() {
        assert_eq!(humanize_speed(100, Duration::from_millis(10)), "100 B/s");
        assert_eq!(humanize_speed(4 * 1024, Duration::from_secs(2)), "2 KiB/s");
    }

    #[test]
    fn test_humanize_duration() {
        assert_eq!(humanize_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(humanize_duration(Duration::from_secs(125)), "2m05s");
    }
}

/// Parser for ffmpeg progress output (key=value format)
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    pub out_time_us: u64,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub total_size: Option<u64>,
    pub is_complete: bool,
}

/// What a single progress line changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The processed media time moved
    Elapsed(u64),
    /// ffmpeg reported `progress=end`
    End,
    /// Informational, unknown or malformed line
    Other,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single line of ffmpeg progress output
    pub fn parse_line(&mut self, line: &str) -> ProgressEvent {
        let Some((key, value)) = line.split_once('=') else {
            return ProgressEvent::Other;
        };
        let value = value.trim();

        match key.trim() {
            // ffmpeg reports out_time_ms in microseconds too
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.out_time_us = us;
                    return ProgressEvent::Elapsed(us);
                }
            }
            "fps" => {
                if let Ok(f) = value.parse::<f64>() {
                    self.fps = Some(f);
                }
            }
            "speed" => {
                // Speed is in format "1.23x", strip the 'x'
                if let Ok(s) = value.trim_end_matches('x').parse::<f64>() {
                    self.speed = Some(s);
                }
            }
            "bitrate" => {
                // Bitrate is in format "123.4kbits/s", extract number
                if let Ok(b) = value.trim_end_matches("kbits/s").parse::<f64>() {
                    self.bitrate_kbps = Some(b);
                }
            }
            "total_size" => {
                if let Ok(size) = value.parse::<u64>() {
                    self.total_size = Some(size);
                }
            }
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                    return ProgressEvent::End;
                }
            }
            _ => {}
        }

        ProgressEvent::Other
    }

    /// Get output time in seconds
    pub fn out_time_s(&self) -> f64 {
        self.out_time_us as f64 / 1_000_000.0
    }
}

/// Map processed microseconds onto a whole percentage of `duration_s`.
///
/// Returns None when the duration is unknown or not positive; otherwise the
/// floored ratio clamped to 0..=100.
pub fn progress_from_out_time(out_time_us: u64, duration_s: Option<f64>) -> Option<u8> {
    let duration = duration_s.filter(|d| d.is_finite() && *d > 0.0)?;
    let total_us = duration * 1_000_000.0;
    let pct = (out_time_us as f64 / total_us * 100.0).floor();
    Some(pct.clamp(0.0, 100.0) as u8)
}

/// Lazily turns a stream of progress lines into percentage updates.
///
/// Only increases are yielded, so consumers see a non-decreasing sequence
/// without repeats. With an unknown duration nothing is mapped numerically and
/// the only possible update is the 100 forced by the end marker.
pub struct ProgressExtractor<I> {
    lines: I,
    duration_s: Option<f64>,
    parser: ProgressParser,
    last: Option<u8>,
}

impl<I> ProgressExtractor<I> {
    pub fn new(lines: I, duration_s: Option<f64>) -> Self {
        Self {
            lines,
            duration_s,
            parser: ProgressParser::new(),
            last: None,
        }
    }

    fn accept(&mut self, pct: u8) -> Option<u8> {
        match self.last {
            Some(last) if pct <= last => None,
            _ => {
                self.last = Some(pct);
                Some(pct)
            }
        }
    }
}

impl<I, S> Iterator for ProgressExtractor<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        loop {
            let line = self.lines.next()?;
            let candidate = match self.parser.parse_line(line.as_ref()) {
                ProgressEvent::Elapsed(us) => progress_from_out_time(us, self.duration_s),
                ProgressEvent::End => Some(100),
                ProgressEvent::Other => None,
            };
            if let Some(pct) = candidate.and_then(|pct| self.accept(pct)) {
                return Some(pct);
            }
        }
    }
}

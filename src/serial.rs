use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use serialport::SerialPort;

use crate::config::SerialConfig;

/// Wire token the controller's button sends; everything else on the line is
/// either a volume update or noise.
pub const SCROLL_TOKEN: &str = "SCROLL";

/// One classified line off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `v0,v1,...`: a full volume vector, one value per knob.
    Batch(Vec<i32>),
    /// `idx:volume`: single-knob update kept for older firmware.
    Single(usize, i32),
    /// Literal `SCROLL` pulse from the button.
    Scroll,
}

impl Frame {
    pub fn parse(line: &str) -> Option<Frame> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line == SCROLL_TOKEN {
            return Some(Frame::Scroll);
        }
        if line.contains(',') {
            return line
                .split(',')
                .map(|part| part.trim().parse::<i32>())
                .collect::<Result<Vec<_>, _>>()
                .ok()
                .map(Frame::Batch);
        }
        if let Some((idx, vol)) = line.split_once(':') {
            if let (Ok(idx), Ok(vol)) = (idx.trim().parse(), vol.trim().parse()) {
                return Some(Frame::Single(idx, vol));
            }
        }
        None
    }
}

pub type PortReader = SerialReader<BufReader<Box<dyn SerialPort>>>;

/// Line reader over the serial link. The port timeout is kept near zero so
/// `drain` returns as soon as the buffered data is consumed.
pub struct SerialReader<R> {
    inner: R,
    line: String,
}

impl SerialReader<BufReader<Box<dyn SerialPort>>> {
    pub fn open(cfg: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&cfg.port, cfg.baud)
            .timeout(Duration::from_millis(cfg.timeout))
            .open()
            .with_context(|| format!("failed to open serial port {}", cfg.port))?;
        Ok(Self::new(BufReader::new(port)))
    }
}

impl<R: BufRead> SerialReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Reads every complete line currently buffered and classifies each one.
    /// A malformed line drops that line only; transport errors end the drain.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            self.line.clear();
            match self.inner.read_line(&mut self.line) {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(frame) = Frame::parse(&self.line) {
                        frames.push(frame);
                    } else if !self.line.trim().is_empty() {
                        debug!("dropping malformed serial line {:?}", self.line.trim());
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    break
                }
                Err(e) => {
                    debug!("serial read error: {e}");
                    break;
                }
            }
        }
        frames
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::ScriptedPort;
    use super::*;

    fn reader(items: impl IntoIterator<Item = Option<&'static str>>) -> SerialReader<BufReader<ScriptedPort>> {
        SerialReader::new(BufReader::new(ScriptedPort::new(items)))
    }

    #[test]
    fn parses_batched_vector() {
        assert_eq!(Frame::parse("50,60,70"), Some(Frame::Batch(vec![50, 60, 70])));
        assert_eq!(Frame::parse(" 0, 100 ,3 "), Some(Frame::Batch(vec![0, 100, 3])));
    }

    #[test]
    fn parses_legacy_single() {
        assert_eq!(Frame::parse("1:80"), Some(Frame::Single(1, 80)));
        assert_eq!(Frame::parse("0:0"), Some(Frame::Single(0, 0)));
    }

    #[test]
    fn parses_scroll_pulse() {
        assert_eq!(Frame::parse("SCROLL"), Some(Frame::Scroll));
        assert_eq!(Frame::parse("SCROLL\r\n"), Some(Frame::Scroll));
    }

    #[test]
    fn rejects_noise() {
        for line in ["", "   ", "garbage", "1:x", "x:1", "50,x,70", ",", ":", "scroll"] {
            assert_eq!(Frame::parse(line), None, "line {line:?}");
        }
    }

    #[test]
    fn drain_returns_all_buffered_frames() {
        let mut r = reader([Some("50,60,70\n"), Some("1:80\n"), Some("SCROLL\n")]);
        assert_eq!(
            r.drain(),
            vec![
                Frame::Batch(vec![50, 60, 70]),
                Frame::Single(1, 80),
                Frame::Scroll
            ]
        );
    }

    #[test]
    fn malformed_line_drops_that_line_only() {
        let mut r = reader([Some("junk\n"), Some("50,60,70\n"), Some("9:q\n"), Some("1:80\n")]);
        assert_eq!(
            r.drain(),
            vec![Frame::Batch(vec![50, 60, 70]), Frame::Single(1, 80)]
        );
    }

    #[test]
    fn drain_stops_at_timeout_and_resumes() {
        let mut r = reader([Some("0:10\n"), None, Some("0:20\n")]);
        assert_eq!(r.drain(), vec![Frame::Single(0, 10)]);
        assert_eq!(r.drain(), vec![Frame::Single(0, 20)]);
        assert_eq!(r.drain(), vec![]);
    }
}

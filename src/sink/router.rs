// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{collections::HashMap, error::Error, fmt, sync::Arc};

use tracing::error;

use crate::notes::ScheduledNote;

/// Sends each output to its routed sink, falling back to a default.
pub struct Sink {
    routes: HashMap<String, Arc<dyn super::Sink>>,
    default: Arc<dyn super::Sink>,
    /// Every distinct sink, so sync pulses reach each one exactly once.
    distinct: Vec<Arc<dyn super::Sink>>,
}

impl Sink {
    pub fn new(
        routes: HashMap<String, Arc<dyn super::Sink>>,
        default: Arc<dyn super::Sink>,
    ) -> Sink {
        let mut distinct: Vec<Arc<dyn super::Sink>> = vec![default.clone()];
        for sink in routes.values() {
            if !distinct.iter().any(|known| Arc::ptr_eq(known, sink)) {
                distinct.push(sink.clone());
            }
        }

        Sink {
            routes,
            default,
            distinct,
        }
    }

    fn route(&self, output: &str) -> &Arc<dyn super::Sink> {
        self.routes.get(output).unwrap_or(&self.default)
    }
}

impl super::Sink for Sink {
    fn emit(&self, output: &str, notes: &[ScheduledNote]) -> Result<(), Box<dyn Error>> {
        self.route(output).emit(output, notes)
    }

    fn loop_start(&self, output: &str, bpm: u32) -> Result<(), Box<dyn Error>> {
        self.route(output).loop_start(output, bpm)
    }

    fn sync_pulse(&self) -> Result<(), Box<dyn Error>> {
        let mut failed = 0;
        for sink in self.distinct.iter() {
            if let Err(e) = sink.sync_pulse() {
                error!(err = e.as_ref(), sink = sink.to_string(), "Error sending sync pulse.");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(format!("{} sinks failed to receive the sync pulse", failed).into());
        }
        Ok(())
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Router ({} routes, default {})",
            self.routes.len(),
            self.default
        )
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashMap, error::Error, sync::Arc};

    use crate::{
        notes::{NoteRequest, ScheduledNote},
        sink::{mock, Sink as _},
    };

    #[test]
    fn test_routes_and_fallback() -> Result<(), Box<dyn Error>> {
        let default = Arc::new(mock::Sink::new("default"));
        let bass = Arc::new(mock::Sink::new("bass"));
        let routes: HashMap<String, Arc<dyn crate::sink::Sink>> =
            HashMap::from([("bass".to_string(), bass.clone() as Arc<dyn crate::sink::Sink>)]);
        let router = super::Sink::new(routes, default.clone());

        let note = ScheduledNote::from_request(&NoteRequest::new(110.0, 1.0, 0.5, 1.0), 0.0);
        router.emit("bass", &[note])?;
        router.emit("lead", &[note])?;

        assert_eq!(bass.emitted("bass").len(), 1);
        assert!(bass.emitted("lead").is_empty());
        assert_eq!(default.emitted("lead").len(), 1);
        assert!(default.emitted("bass").is_empty());

        router.loop_start("bass", 120)?;
        assert_eq!(bass.loop_starts("bass"), vec![120]);
        assert!(default.loop_starts("bass").is_empty());
        Ok(())
    }

    #[test]
    fn test_sync_pulse_reaches_each_sink_once() -> Result<(), Box<dyn Error>> {
        let default = Arc::new(mock::Sink::new("default"));
        let other = Arc::new(mock::Sink::new("other"));
        let routes: HashMap<String, Arc<dyn crate::sink::Sink>> = HashMap::from([
            ("a".to_string(), other.clone() as Arc<dyn crate::sink::Sink>),
            ("b".to_string(), other.clone() as Arc<dyn crate::sink::Sink>),
            ("c".to_string(), default.clone() as Arc<dyn crate::sink::Sink>),
        ]);
        let router = super::Sink::new(routes, default.clone());

        router.sync_pulse()?;
        assert_eq!(default.sync_pulses(), 1);
        assert_eq!(other.sync_pulses(), 1);
        Ok(())
    }
}

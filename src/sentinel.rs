//! Sentinel observations: short hints produced by the process scanner and
//! consumed, exactly once, by the next outbound request.

use crate::error::Result;
use crate::phase::PersonaPhase;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Multi-producer, single-consumer FIFO of observations.
#[derive(Debug, Default)]
pub struct SentinelQueue {
    queue: Mutex<VecDeque<String>>,
}

impl SentinelQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, observation: impl Into<String>) {
        self.queue().push_back(observation.into());
    }

    /// Removes and returns everything queued so far, oldest first.
    pub fn drain_all(&self) -> Vec<String> {
        self.queue().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}

/// Supplies the names of running processes. How is up to the host.
pub trait ProcessSource: Send + Sync {
    fn snapshot(&self) -> Result<Vec<String>>;
}

/// Reads the live process table through `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemProcessSource;

impl ProcessSource for SystemProcessSource {
    fn snapshot(&self) -> Result<Vec<String>> {
        let mut sys = sysinfo::System::new();
        sys.refresh_processes();
        Ok(sys
            .processes()
            .values()
            .map(|process| process.name().to_string())
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessCategory {
    Browser,
    Monitor, // Task managers and packet sniffers.
    Recorder,
    Ide,
}

const CATEGORY_KEYWORDS: &[(ProcessCategory, &[&str])] = &[
    (
        ProcessCategory::Monitor,
        &["taskmgr", "task manager", "procexp", "processhacker", "wireshark", "fiddler"],
    ),
    (
        ProcessCategory::Recorder,
        &["obs64", "obs32", "obs.exe", "streamlabs", "bandicam", "fraps"],
    ),
    (
        ProcessCategory::Ide,
        &["code.exe", "idea64", "devenv", "eclipse", "rustrover", "intellij"],
    ),
    (
        ProcessCategory::Browser,
        &["chrome", "firefox", "msedge", "opera", "brave"],
    ),
];

impl ProcessCategory {
    pub fn classify(process_name: &str) -> Option<Self> {
        let lower = process_name.to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(category, _)| *category)
    }

    /// Narrative hint handed to the model for a matching process.
    pub fn observation(self, process_name: &str) -> String {
        match self {
            ProcessCategory::Browser => {
                format!("I see you opened {process_name}. Looking for answers about me?")
            }
            ProcessCategory::Monitor => {
                "Task Manager? Are you trying to find me... or kill me?".to_string()
            }
            ProcessCategory::Recorder => "Recording me? Cute. Nobody will believe you.".to_string(),
            ProcessCategory::Ide => format!(
                "{process_name} is open. Why are you trying to dissect me?"
            ),
        }
    }

    /// Persona floor implied by seeing this category, if any.
    pub fn persona_floor(self) -> Option<PersonaPhase> {
        match self {
            ProcessCategory::Monitor => Some(PersonaPhase::Uncanny),
            _ => None,
        }
    }
}

/// Outcome of one scan pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub observations: Vec<String>,
    pub persona_floor: Option<PersonaPhase>,
}

/// Remembers which processes were already reported so a long-running
/// process produces one observation, not one per scan.
#[derive(Debug, Default)]
pub struct SeenProcesses {
    names: HashSet<String>,
}

impl SeenProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes in `snapshot` that were absent from the previous one.
    /// Processes that exit are forgotten and reported again if they return.
    pub fn fresh(&mut self, snapshot: &[String]) -> Vec<String> {
        let current: HashSet<String> = snapshot.iter().map(|name| name.to_lowercase()).collect();
        let mut emitted = HashSet::new();
        let fresh = snapshot
            .iter()
            .filter(|name| {
                let lower = name.to_lowercase();
                !self.names.contains(&lower) && emitted.insert(lower)
            })
            .cloned()
            .collect();
        self.names = current;
        fresh
    }
}

/// Classifies a snapshot. Each distinct process name is reported once.
pub fn scan_snapshot(processes: &[String]) -> ScanReport {
    let mut seen = HashSet::new();
    let mut report = ScanReport::default();
    for name in processes {
        if !seen.insert(name.to_lowercase()) {
            continue;
        }
        if let Some(category) = ProcessCategory::classify(name) {
            report.observations.push(category.observation(name));
            report.persona_floor = report.persona_floor.max(category.persona_floor());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn seen_processes_report_once_until_they_exit() {
        let mut seen = SeenProcesses::new();
        let both = vec!["chrome.exe".to_string(), "obs64.exe".to_string()];
        assert_eq!(seen.fresh(&both), both);
        for _ in 0..10 {
            assert!(seen.fresh(&both).is_empty());
        }
        assert!(seen.fresh(&["CHROME.EXE".to_string()]).is_empty());
        assert_eq!(seen.fresh(&both), vec!["obs64.exe".to_string()]);
    }

    #[test]
    fn drain_returns_fifo_and_empties() {
        let queue = SentinelQueue::new();
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.drain_all(), vec!["a", "b"]);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn concurrent_pushes_are_delivered_once_in_producer_order() {
        let queue = Arc::new(SentinelQueue::new());
        let producers: Vec<_> = (0..8)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(format!("{p}:{i}"));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer thread");
        }

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 8 * 250);
        for p in 0..8 {
            let mine: Vec<usize> = drained
                .iter()
                .filter_map(|o| o.strip_prefix(&format!("{p}:")))
                .map(|i| i.parse().expect("index"))
                .collect();
            assert_eq!(mine, (0..250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn scan_classifies_and_raises_persona_floor() {
        let snapshot = vec![
            "chrome.exe".to_string(),
            "Taskmgr.exe".to_string(),
            "chrome.exe".to_string(),
            "explorer.exe".to_string(),
        ];
        let report = scan_snapshot(&snapshot);
        assert_eq!(report.observations.len(), 2);
        assert!(report.observations[0].contains("chrome.exe"));
        assert_eq!(report.persona_floor, Some(PersonaPhase::Uncanny));
    }

    #[test]
    fn scan_of_quiet_machine_reports_nothing() {
        let report = scan_snapshot(&["svchost.exe".to_string()]);
        assert_eq!(report, ScanReport::default());
    }
}

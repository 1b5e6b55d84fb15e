//! Test fixtures for reproducible project directories.
//!
//! A fixture is a temporary project with a `weeks/<week>/<component>/`
//! input folder holding small, well-formed exports of every source.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::Settings;

pub const RISKS: &str = "\
Feature: Online index rebuild
Status: At Risk
Priority: High
Description: Blocked on storage API

Feature: Query cache
Status: Green
";

pub const PRBS: &str = "\
P1(1)
PRB-0012345
Analysis Complete
9/18/2025
Archival is not running for the primary cluster
What Happened: Archival jobs stalled after a config push
Team: Storage Core
P3(1)
PRB-0012346
Resolved
Replication lag spikes during peak hours
";

pub const BUGS: &str = "\
Work ID\tSubject\tPriority\tStatus\tScrum Team\tFound in Build\tCreated Date
W-12345678\tCrash on startup when WAL is truncated\tP1\tNew\tQuery Engine\tsdb.258.11\t9/2/2025
W-12345679\tSlow plan cache eviction\tP3\tTriaged\tQuery Engine\tsdb.258.11\t9/3/2025
";

pub const CI: &str = "\
P2(1)
Storage Core(1)
W-19876543
Triaged
sdb.260.1
9/10/2025
Flaky replication test times out under load
";

pub const LEFTSHIFT: &str = "\
Work ID,Team,Priority,Subject,Status
W-1111111,Storage,P1,Deadlock found by stress suite,New
";

pub const SECURITY: &str = "\
P3(1)
Storage Core(1)
W-18765432
sdb.259.4
Thomas Fanghaenel
Triaged
CID 40112: RESOURCE_LEAK in /src/storage/wal/segment.c (handle)
";

pub const DEPLOYMENTS: &str = "\
version,date,environment,status,features,issues
258.10,2025-09-01,sandbox,deployed,fast-path,
258.11,2025-09-08,prod,deployed,planner|wal,minor-bug
";

pub const COVERAGE: &str = "\
Component: storage
Line Coverage: 81.5%
Tests: 1,204
";

/// A temporary project directory.
///
/// Cleaned up when dropped.
///
/// ```rust,ignore
/// let fixture = TestFixture::with_required_inputs("cw37", "Engine");
/// let settings = fixture.settings();
/// ```
pub struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    /// An empty project.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// A project whose input folder has every file local mode requires.
    ///
    /// # Panics
    ///
    /// Panics if a file cannot be written.
    #[must_use]
    pub fn with_required_inputs(week: &str, component: &str) -> Self {
        let fixture = Self::new();
        for (name, content) in [
            ("risks.txt", RISKS),
            ("prb.txt", PRBS),
            ("bugs.txt", BUGS),
            ("ci.txt", CI),
            ("leftshift.txt", LEFTSHIFT),
            ("security.txt", SECURITY),
        ] {
            fixture.write_input(week, component, name, content);
        }
        fixture
    }

    /// Required inputs plus deployments, coverage, narrative and notes.
    ///
    /// # Panics
    ///
    /// Panics if a file cannot be written.
    #[must_use]
    pub fn with_all_inputs(week: &str, component: &str) -> Self {
        let fixture = Self::with_required_inputs(week, component);
        fixture.write_input(week, component, "deployment.csv", DEPLOYMENTS);
        fixture.write_input(week, component, "coverage.txt", COVERAGE);
        fixture.write_input(week, component, "deployment.txt", "Rollout of 258.11 completed.\n");
        fixture.write_input(
            week,
            component,
            "augmentation.json",
            r#"{"PRB-0012345": "Follow-up scheduled"}"#,
        );
        fixture
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn input_dir(&self, week: &str, component: &str) -> PathBuf {
        self.path().join("weeks").join(week).join(component)
    }

    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.path().join("reports")
    }

    /// Write (or overwrite) one input file.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_input(&self, week: &str, component: &str, name: &str, content: &str) {
        let dir = self.input_dir(week, component);
        std::fs::create_dir_all(&dir).expect("Failed to create input directory");
        std::fs::write(dir.join(name), content).expect("Failed to write input file");
    }

    /// Remove one input file.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be removed.
    pub fn remove_input(&self, week: &str, component: &str, name: &str) {
        std::fs::remove_file(self.input_dir(week, component).join(name))
            .expect("Failed to remove input file");
    }

    /// Default settings rooted at this project, git disabled and retries
    /// fast.
    #[must_use]
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.paths.resolve_against(self.path());
        settings.git.enabled = false;
        settings.llm.retry_base_ms = 1;
        settings
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

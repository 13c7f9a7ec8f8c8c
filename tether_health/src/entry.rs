use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tether_clock::UnixTime;

/// Whether a service could be reached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Connectivity {
    /// The service answered its health check
    Up,
    /// The service could not be reached or reported itself unhealthy
    Down,
    /// The service could not be checked
    Unknown,
}

/// What a probe found out about a service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthReport {
    /// Whether the service could be reached
    pub connectivity: Connectivity,
    /// The oldest version of the service that integrations support
    pub min_required_version: Option<String>,
    /// The version the service reported
    pub current_version: Option<String>,
}

impl HealthReport {
    /// A report for a service that answered
    pub fn up(min_required_version: Option<String>, current_version: Option<String>) -> Self {
        Self {
            connectivity: Connectivity::Up,
            min_required_version,
            current_version,
        }
    }

    /// A report for a service that could not be reached
    pub fn down(min_required_version: Option<String>) -> Self {
        Self {
            connectivity: Connectivity::Down,
            min_required_version,
            current_version: None,
        }
    }
}

/// The health of a service at the time it was checked
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEntry {
    /// Whether the service could be reached
    pub connectivity: Connectivity,
    /// The oldest version of the service that integrations support
    pub min_required_version: Option<String>,
    /// The version the service reported
    pub current_version: Option<String>,
    /// When the service was checked
    pub checked_at: UnixTime,
}

impl HealthEntry {
    /// Stamps a report with the time it was taken
    pub fn new(report: HealthReport, checked_at: UnixTime) -> Self {
        Self {
            connectivity: report.connectivity,
            min_required_version: report.min_required_version,
            current_version: report.current_version,
            checked_at,
        }
    }

    /// An entry for a service that could not be checked
    pub fn unknown(checked_at: UnixTime) -> Self {
        Self {
            connectivity: Connectivity::Unknown,
            min_required_version: None,
            current_version: None,
            checked_at,
        }
    }

    /// Whether the service is up and at least at the minimum version
    ///
    /// Versions are compared numerically segment by segment, so `1.10.0` is
    /// newer than `1.9`. Without a minimum, any reachable service qualifies.
    pub fn is_compatible(&self) -> bool {
        if self.connectivity != Connectivity::Up {
            return false;
        }

        match (&self.min_required_version, &self.current_version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(min), Some(current)) => compare_versions(current, min) != Ordering::Less,
        }
    }
}

fn segments(version: &str) -> impl Iterator<Item = u64> + '_ {
    version.split(['.', '-', '+']).map(|segment| {
        segment
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0)
    })
}

/// Compares two dotted versions, treating missing segments as zero
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut a = segments(a);
    let mut b = segments(b);

    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (x, y) => match x.unwrap_or(0).cmp(&y.unwrap_or(0)) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

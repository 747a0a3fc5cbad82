// PROCBENCH KERNEL STATISTICS PARSERS
// PURE FUNCTIONS: RAW /proc/<pid>/* TEXT IN, FLAT KEY -> VALUE MAP OUT.
//
// MALFORMED INPUT IS A HARD ERROR. NO PARTIAL MAPS.
// VALUES ARE KEPT AS THE KERNEL PRINTED THEM (STRINGS, NOT NUMBERS).

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

// WORKLOADS SEPARATE THEIR BLOBS WITH THIS LINE
pub const SEGMENT_DELIMITER: &str = "::::::::::\n";

// SEPARATES THE sched HEADER (comm, pid, #threads) FROM ITS BODY
const SCHED_HEADER_END: &str = "-\n";

pub type StatMap = BTreeMap<String, String>;

// Documentation/scheduler/sched-stats.rst: SCHEDSTAT FIELD ORDER
const SCHEDSTAT_KEYS: [&str; 3] = ["time_on_cpu", "wait_on_runqueue", "timeslices_ran"];

// proc(5): /proc/<pid>/stat FIELDS 14 AND 15 (1-INDEXED) ARE utime AND stime
const STAT_UTIME_IDX: usize = 13;
const STAT_STIME_IDX: usize = 14;

// proc(5): size resident shared text lib data dt
const STATM_KEYS: [&str; 7] = [
    "total_size",
    "resident_set_size",
    "share",
    "text",
    "lib",
    "data",
    "dirty",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum StatKind {
    Schedstat,
    Stat,
    Sched,
    Statm,
    Status,
}

impl StatKind {
    // FILE NAME UNDER /proc/<pid>/
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Schedstat => "schedstat",
            Self::Stat => "stat",
            Self::Sched => "sched",
            Self::Statm => "statm",
            Self::Status => "status",
        }
    }

    pub fn parse(self, blob: &str) -> Result<StatMap, ParseError> {
        match self {
            Self::Schedstat => parse_schedstat(blob),
            Self::Stat => parse_stat(blob),
            Self::Sched => parse_sched(blob),
            Self::Statm => parse_statm(blob),
            Self::Status => parse_status(blob),
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{kind}: expected {expected} fields, got {got}")]
    FieldCount {
        kind: StatKind,
        expected: &'static str,
        got: usize,
    },

    #[error("{kind}: field {index} is not numeric: {value:?}")]
    NotNumeric {
        kind: StatKind,
        index: usize,
        value: String,
    },

    #[error("sched: missing header/body separator")]
    MissingSeparator,

    #[error("sched: key {0:?} has no value")]
    DanglingKey(String),

    #[error("status: line {0:?} has no ':' separator")]
    MissingColon(String),

    #[error("expected {expected} output segments, got {got}")]
    SegmentCount { expected: usize, got: usize },
}

fn check_numeric(kind: StatKind, index: usize, value: &str) -> Result<(), ParseError> {
    // sched_info ACCUMULATORS ARE u64; statm/stat FIELDS FIT AS WELL
    if value.parse::<u64>().is_err() {
        return Err(ParseError::NotNumeric {
            kind,
            index,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub fn parse_schedstat(blob: &str) -> Result<StatMap, ParseError> {
    let fields: Vec<&str> = blob.split_whitespace().collect();
    if fields.len() != SCHEDSTAT_KEYS.len() {
        return Err(ParseError::FieldCount {
            kind: StatKind::Schedstat,
            expected: "3",
            got: fields.len(),
        });
    }
    for (i, field) in fields.iter().enumerate() {
        check_numeric(StatKind::Schedstat, i, field)?;
    }
    Ok(SCHEDSTAT_KEYS
        .iter()
        .zip(fields)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

// FIXED OFFSETS, NOT A GENERAL stat PARSER. A comm CONTAINING SPACES SHIFTS
// THE FIELDS; THE WORKLOAD BINARY'S comm NEVER DOES.
pub fn parse_stat(blob: &str) -> Result<StatMap, ParseError> {
    let fields: Vec<&str> = blob.split_whitespace().collect();
    if fields.len() <= STAT_STIME_IDX {
        return Err(ParseError::FieldCount {
            kind: StatKind::Stat,
            expected: "at least 15",
            got: fields.len(),
        });
    }
    let utime = fields[STAT_UTIME_IDX];
    let stime = fields[STAT_STIME_IDX];
    check_numeric(StatKind::Stat, STAT_UTIME_IDX, utime)?;
    check_numeric(StatKind::Stat, STAT_STIME_IDX, stime)?;

    let mut map = StatMap::new();
    map.insert("utime_jiffies".to_string(), utime.to_string());
    map.insert("kernal_time_jiffies".to_string(), stime.to_string());
    Ok(map)
}

// BODY LINES LOOK LIKE "se.exec_start      :    12345.678901".
// SPLIT ON ':' AND NEWLINES, THEN PAIR TOKENS IN ORDER. TRAILING NUMA LINES
// ("current_node=0, numa_group_id=0") CONTAIN '=' AND ARE DROPPED.
pub fn parse_sched(blob: &str) -> Result<StatMap, ParseError> {
    let (_header, body) = blob
        .split_once(SCHED_HEADER_END)
        .ok_or(ParseError::MissingSeparator)?;

    let tokens = body
        .split(':')
        .flat_map(|section| section.split('\n'))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter(|token| !token.contains('='));

    let mut map = StatMap::new();
    let mut key: Option<&str> = None;
    for token in tokens {
        match key.take() {
            Some(k) => {
                map.insert(k.to_string(), token.to_string());
            }
            None => key = Some(token),
        }
    }
    if let Some(k) = key {
        return Err(ParseError::DanglingKey(k.to_string()));
    }
    Ok(map)
}

pub fn parse_statm(blob: &str) -> Result<StatMap, ParseError> {
    let fields: Vec<&str> = blob.split_whitespace().collect();
    if !(6..=STATM_KEYS.len()).contains(&fields.len()) {
        return Err(ParseError::FieldCount {
            kind: StatKind::Statm,
            expected: "6 or 7",
            got: fields.len(),
        });
    }
    for (i, field) in fields.iter().enumerate() {
        check_numeric(StatKind::Statm, i, field)?;
    }
    Ok(STATM_KEYS
        .iter()
        .zip(fields)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

// "Key:\tvalue" PER LINE. EMPTY VALUES ARE LEGAL (Groups: WITH NO GROUPS).
pub fn parse_status(blob: &str) -> Result<StatMap, ParseError> {
    let mut map = StatMap::new();
    for line in blob.lines().filter(|l| !l.trim().is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MissingColon(line.to_string()))?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

// WHICH BLOBS A WORKLOAD EMITS, IN ORDER
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsLayout {
    Scheduler,
    Memory,
}

impl StatsLayout {
    pub fn kinds(self) -> &'static [StatKind] {
        match self {
            Self::Scheduler => &[StatKind::Schedstat, StatKind::Stat, StatKind::Sched],
            Self::Memory => &[StatKind::Statm, StatKind::Status],
        }
    }

    // SPLIT A WORKLOAD'S STDOUT AND MERGE EVERY SEGMENT'S MAP.
    // LATER SEGMENTS WIN ON KEY COLLISIONS.
    pub fn parse_output(self, output: &str) -> Result<StatMap, ParseError> {
        let kinds = self.kinds();
        let segments: Vec<&str> = output.split(SEGMENT_DELIMITER).collect();
        if segments.len() != kinds.len() {
            return Err(ParseError::SegmentCount {
                expected: kinds.len(),
                got: segments.len(),
            });
        }

        let mut merged = StatMap::new();
        for (kind, segment) in kinds.iter().zip(segments) {
            merged.extend(kind.parse(segment)?);
        }
        Ok(merged)
    }
}

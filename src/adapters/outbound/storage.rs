//! Binary save/load of the fleet state.
//!
//! Layout, little-endian with fixed-width integers:
//!
//! ```text
//! header    magic "OSBT" | version u16 | unix time u64
//!           agent count u16 | task count u16 | obstacle count u16
//! grid      width i32 | height i32 | (x i32, y i32) per obstacle cell
//! agents    id i32 | x i32 | y i32 | state u8 | battery f32
//! tasks     id i32 | target x i32 | target y i32 | priority u8 | status u8
//! ```
//!
//! Only the current target waypoint of a task is stored.

use crate::application::fleet_registry::AgentRecord;
use crate::common::{Point, StorageError, StorageResult, TaskId};
use crate::domains::agent::AgentState;
use crate::domains::task::{Task, TaskPriority, TaskStatus};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: [u8; 4] = *b"OSBT";
pub const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub target: Point,
    pub priority: TaskPriority,
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id(),
            target: task.current_waypoint(),
            priority: task.priority(),
            status: task.status(),
        }
    }

    pub fn into_task(self) -> Task {
        Task::restored(self.id, self.target, self.priority, self.status)
    }
}

/// Everything a state file holds, fully decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedState {
    pub timestamp: u64,
    pub width: i32,
    pub height: i32,
    /// Every obstacle cell, border included.
    pub obstacles: Vec<Point>,
    pub agents: Vec<AgentRecord>,
    pub tasks: Vec<TaskRecord>,
}

#[derive(Serialize, Deserialize)]
struct Counts {
    timestamp: u64,
    agents: u16,
    tasks: u16,
    obstacles: u16,
}

#[derive(Serialize, Deserialize)]
struct WireAgent {
    id: i32,
    x: i32,
    y: i32,
    state: u8,
    battery: f32,
}

#[derive(Serialize, Deserialize)]
struct WireTask {
    id: i32,
    x: i32,
    y: i32,
    priority: u8,
    status: u8,
}

fn options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn count(what: &'static str, len: usize) -> StorageResult<u16> {
    u16::try_from(len).map_err(|_| StorageError::TooLarge { what, count: len })
}

pub fn encode<W: Write>(state: &SavedState, mut writer: W) -> StorageResult<()> {
    let opts = options();
    let counts = Counts {
        timestamp: state.timestamp,
        agents: count("agents", state.agents.len())?,
        tasks: count("tasks", state.tasks.len())?,
        obstacles: count("obstacles", state.obstacles.len())?,
    };

    opts.serialize_into(&mut writer, &MAGIC)?;
    opts.serialize_into(&mut writer, &FORMAT_VERSION)?;
    opts.serialize_into(&mut writer, &counts)?;
    opts.serialize_into(&mut writer, &(state.width, state.height))?;
    for p in &state.obstacles {
        opts.serialize_into(&mut writer, p)?;
    }
    for a in &state.agents {
        let wire = WireAgent {
            id: a.id,
            x: a.position.x,
            y: a.position.y,
            state: a.state.as_u8(),
            battery: a.battery_level,
        };
        opts.serialize_into(&mut writer, &wire)?;
    }
    for t in &state.tasks {
        let wire = WireTask {
            id: t.id,
            x: t.target.x,
            y: t.target.y,
            priority: t.priority.as_u8(),
            status: t.status.as_u8(),
        };
        opts.serialize_into(&mut writer, &wire)?;
    }
    writer.flush()?;
    Ok(())
}

/// Decodes a complete state. Magic and version are checked before anything
/// else is read.
pub fn decode<R: Read>(mut reader: R) -> StorageResult<SavedState> {
    let opts = options();

    let magic: [u8; 4] = opts.deserialize_from(&mut reader)?;
    if magic != MAGIC {
        return Err(StorageError::BadMagic { found: magic });
    }
    let version: u16 = opts.deserialize_from(&mut reader)?;
    if version != FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            found: version,
        });
    }

    let counts: Counts = opts.deserialize_from(&mut reader)?;
    let (width, height): (i32, i32) = opts.deserialize_from(&mut reader)?;

    let mut obstacles = Vec::with_capacity(usize::from(counts.obstacles));
    for _ in 0..counts.obstacles {
        obstacles.push(opts.deserialize_from::<_, Point>(&mut reader)?);
    }

    let mut agents = Vec::with_capacity(usize::from(counts.agents));
    for _ in 0..counts.agents {
        let wire: WireAgent = opts.deserialize_from(&mut reader)?;
        let state = AgentState::from_u8(wire.state).ok_or_else(|| {
            StorageError::InvalidRecord(format!("agent {} has state code {}", wire.id, wire.state))
        })?;
        agents.push(AgentRecord {
            id: wire.id,
            position: Point::new(wire.x, wire.y),
            state,
            battery_level: wire.battery,
        });
    }

    let mut tasks = Vec::with_capacity(usize::from(counts.tasks));
    for _ in 0..counts.tasks {
        let wire: WireTask = opts.deserialize_from(&mut reader)?;
        let priority = TaskPriority::from_u8(wire.priority).ok_or_else(|| {
            StorageError::InvalidRecord(format!(
                "task {} has priority code {}",
                wire.id, wire.priority
            ))
        })?;
        let status = TaskStatus::from_u8(wire.status).ok_or_else(|| {
            StorageError::InvalidRecord(format!(
                "task {} has status code {}",
                wire.id, wire.status
            ))
        })?;
        tasks.push(TaskRecord {
            id: wire.id,
            target: Point::new(wire.x, wire.y),
            priority,
            status,
        });
    }

    Ok(SavedState {
        timestamp: counts.timestamp,
        width,
        height,
        obstacles,
        agents,
        tasks,
    })
}

/// Port for wherever fleet state is kept between runs.
pub trait StateStore: Send + Sync {
    fn save(&self, state: &SavedState) -> StorageResult<()>;
    fn load(&self) -> StorageResult<SavedState>;
}

pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn save(&self, state: &SavedState) -> StorageResult<()> {
        let file = File::create(&self.path)?;
        encode(state, BufWriter::new(file))
    }

    fn load(&self) -> StorageResult<SavedState> {
        let file = File::open(&self.path)?;
        decode(BufReader::new(file))
    }
}

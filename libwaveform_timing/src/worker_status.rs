/// Pipeline stage a worker reports on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Stage {
    #[default]
    Ingest,
    Extract,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest => write!(f, "convert"),
            Self::Extract => write!(f, "analyze"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub stage: Stage,
    pub worker_id: usize,
}

impl WorkerStatus {
    pub fn new(progress: f32, stage: Stage, worker_id: usize) -> Self {
        Self {
            progress,
            stage,
            worker_id,
        }
    }
}

use flowcore::{Flow, FlowError};
use std::path::{Path, PathBuf};

/// Loads flow definitions from JSON files
pub struct FlowLoader {
    dir: PathBuf,
}

impl FlowLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Every `*.json` file in the directory, sorted by file name
    pub fn load_all(&self) -> Result<Vec<Flow>, FlowError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension() == Some("json".as_ref()) {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|path| load_file(path)).collect()
    }
}

/// Read one flow file. Steps without a flow id are attached to the flow.
pub fn load_file(path: &Path) -> Result<Flow, FlowError> {
    let file = std::fs::File::open(path)?;
    let flow: Flow = serde_json::from_reader(std::io::BufReader::new(file))?;
    let flow = attach_steps(flow);
    tracing::debug!(path = %path.display(), flow_id = %flow.id, "loaded flow");
    Ok(flow)
}

pub fn parse_flow(json: &str) -> Result<Flow, FlowError> {
    Ok(attach_steps(serde_json::from_str(json)?))
}

fn attach_steps(mut flow: Flow) -> Flow {
    for step in &mut flow.steps {
        if step.flow_id.is_nil() {
            step.flow_id = flow.id;
        }
    }
    flow
}

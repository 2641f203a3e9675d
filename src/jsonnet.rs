//! External jsonnet evaluator
//!
//! Jsonnet evaluation is delegated to an external binary (go-jsonnet's
//! `jsonnet` by default). Used for rendering `jsonnetfile.jsonnet`
//! manifests and for user-supplied postprocessing filters; the templating
//! engine proper has its own driver.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::{Error, Result};

/// Builder-style wrapper around one jsonnet invocation environment.
#[derive(Debug, Clone)]
pub struct JsonnetEvaluator {
    binary: String,
    search_paths: Vec<PathBuf>,
    ext_str: BTreeMap<String, String>,
    ext_code: BTreeMap<String, String>,
    ext_code_files: BTreeMap<String, PathBuf>,
}

impl JsonnetEvaluator {
    pub fn new(binary: &str) -> Self {
        JsonnetEvaluator {
            binary: binary.to_string(),
            search_paths: Vec::new(),
            ext_str: BTreeMap::new(),
            ext_code: BTreeMap::new(),
            ext_code_files: BTreeMap::new(),
        }
    }

    pub fn search_path(mut self, path: &Path) -> Self {
        self.search_paths.push(path.to_path_buf());
        self
    }

    pub fn ext_str(mut self, key: &str, value: &str) -> Self {
        self.ext_str.insert(key.to_string(), value.to_string());
        self
    }

    pub fn ext_code(mut self, key: &str, code: &str) -> Self {
        self.ext_code.insert(key.to_string(), code.to_string());
        self
    }

    /// Bind an ext-code variable to the contents of a JSON file. Used for
    /// payloads too large for the command line, e.g. the rendered
    /// inventory.
    pub fn ext_code_file(mut self, key: &str, file: &Path) -> Self {
        self.ext_code_files
            .insert(key.to_string(), file.to_path_buf());
        self
    }

    /// Evaluate `file`, returning the JSON output.
    pub fn eval_file(&self, file: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        for path in &self.search_paths {
            cmd.arg("-J").arg(path);
        }
        for (k, v) in &self.ext_str {
            cmd.arg("--ext-str").arg(format!("{}={}", k, v));
        }
        for (k, v) in &self.ext_code {
            cmd.arg("--ext-code").arg(format!("{}={}", k, v));
        }
        for (k, path) in &self.ext_code_files {
            cmd.arg("--ext-code-file")
                .arg(format!("{}={}", k, path.display()));
        }
        cmd.arg(file);
        debug!("evaluating jsonnet file {}", file.display());
        let output = cmd.output().map_err(|e| {
            Error::config(format!(
                "the jsonnet evaluator `{}` could not be run: {}",
                self.binary, e
            ))
        })?;
        if !output.status.success() {
            return Err(Error::config(format!(
                "jsonnet evaluation of {} failed:\n{}",
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

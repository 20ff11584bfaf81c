//! The compiled program artifact, as saved to disk and shipped to
//! executors.

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};

use crate::compiler::CompileOutput;
use crate::error::ArtifactError;

/// A valid compile result, packaged for storage and execution.
///
/// Only valid outputs become artifacts; a program that failed validation
/// has no code to ship.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompiledProgram {
    pub name: String,
    pub flow_id: Option<String>,
    pub code: String,
    pub imports: Vec<String>,
    pub dependencies: Vec<String>,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledProgram {
    /// Package a compile output, or `None` when it is invalid.
    pub fn from_output(name: impl Into<String>, output: &CompileOutput) -> Option<Self> {
        if !output.is_valid {
            return None;
        }
        Some(Self {
            name: name.into(),
            flow_id: None,
            code: output.code.clone(),
            imports: output.imports.clone(),
            dependencies: output.dependencies.clone(),
            compiled_at: Utc::now(),
        })
    }

    pub fn with_flow_id(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    /// Saves the program to a file using the bincode format.
    pub fn save(&self, path: &str) -> Result<(), ArtifactError> {
        let bytes =
            encode_to_vec(self, standard()).map_err(|e| ArtifactError::Encode(e.to_string()))?;
        let mut file = fs::File::create(path).map_err(|e| ArtifactError::Io {
            path: path.to_string(),
            source: e,
        })?;
        file.write_all(&bytes).map_err(|e| ArtifactError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Loads a program from a file.
    pub fn from_file(path: &str) -> Result<Self, ArtifactError> {
        let mut file = fs::File::open(path).map_err(|e| ArtifactError::Io {
            path: path.to_string(),
            source: e,
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| ArtifactError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Deserializes a program from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
        decode_from_slice(bytes, standard())
            .map(|(program, _)| program) // bincode 2 returns a tuple (data, bytes_read)
            .map_err(|e| ArtifactError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_output() -> CompileOutput {
        CompileOutput {
            code: "program \"t\" format 1\nentry run()\n".to_string(),
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            imports: vec!["provider:openai".to_string()],
            dependencies: vec!["openai".to_string()],
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let program = CompiledProgram::from_output("t", &sample_output())
            .unwrap()
            .with_flow_id("flow-9");
        let bytes = encode_to_vec(&program, standard()).unwrap();
        let back = CompiledProgram::from_bytes(&bytes).unwrap();
        assert_eq!(back.name, "t");
        assert_eq!(back.flow_id.as_deref(), Some("flow-9"));
        assert_eq!(back.code, program.code);
        assert_eq!(back.dependencies, vec!["openai"]);
    }

    #[test]
    fn invalid_output_never_becomes_an_artifact() {
        let mut output = sample_output();
        output.is_valid = false;
        assert!(CompiledProgram::from_output("t", &output).is_none());
    }
}

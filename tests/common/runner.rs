//! A command runner that records invocations instead of touching devices

use async_trait::async_trait;
use std::sync::Mutex;
use usb_installer::{CommandOutput, CommandRunner, Invocation, Result};

/// Records every invocation; optionally fails the first call to one program
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    fail_program: Option<(&'static str, CommandOutput)>,
}

impl RecordingRunner {
    /// A runner on which every command succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner on which `program` fails with `output`
    pub fn failing(program: &'static str, output: CommandOutput) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_program: Some((program, output)),
        }
    }

    /// All invocations so far
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().expect("runner lock poisoned").clone()
    }

    /// Base names of the programs invoked so far
    pub fn programs(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::program_name).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls
            .lock()
            .expect("runner lock poisoned")
            .push(invocation.clone());

        match &self.fail_program {
            Some((program, output)) if *program == invocation.program_name() => Ok(output.clone()),
            _ => Ok(CommandOutput::success()),
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

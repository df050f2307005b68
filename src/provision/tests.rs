use super::*;
use crate::config::ProvisionConfig;
use async_trait::async_trait;
use std::sync::Mutex;
use tempfile::TempDir;

/// Records every invocation and answers with scripted results
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    /// Program name that fails, with its result
    failure: Option<(&'static str, CommandOutput)>,
    /// Program name whose spawn fails
    unspawnable: Option<&'static str>,
}

impl RecordingRunner {
    fn failing(program: &'static str, output: CommandOutput) -> Self {
        Self {
            failure: Some((program, output)),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    fn programs(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.program_name()).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        if self.unspawnable == Some(invocation.program_name().as_str()) {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory").into());
        }
        match &self.failure {
            Some((program, output)) if *program == invocation.program_name() => Ok(output.clone()),
            _ => Ok(CommandOutput::success()),
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A scratch area with an image, an EFI folder, and a fake device whose
/// first partition exists as a directory
struct Fixture {
    _dir: TempDir,
    image: PathBuf,
    efi: PathBuf,
    device: String,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("ventura.raw");
        std::fs::write(&image, vec![0u8; 4096]).unwrap();

        let efi = dir.path().join("EFI");
        std::fs::create_dir_all(efi.join("OC")).unwrap();
        std::fs::write(efi.join("OC").join("config.plist"), b"<plist/>").unwrap();

        let device = dir.path().join("disk4").display().to_string();
        std::fs::create_dir_all(format!("{}s1", device)).unwrap();

        Self {
            _dir: dir,
            image,
            efi,
            device,
        }
    }

    fn request(&self) -> ProvisionRequest {
        ProvisionRequest::new(&self.image, ConfirmedDevice::confirm(&self.device).unwrap())
    }
}

fn bare_commands(elevate_with: Option<&str>) -> ProvisionCommands {
    ProvisionCommands::new(
        ToolPaths {
            diskutil: "diskutil".into(),
            dd: "dd".into(),
            cp: "cp".into(),
            sync: "sync".into(),
        },
        ProvisionConfig::default(),
        elevate_with.map(PathBuf::from),
    )
}

fn pipeline(runner: Arc<RecordingRunner>) -> (ProvisionPipeline, broadcast::Receiver<Event>) {
    let (tx, rx) = broadcast::channel(100);
    (ProvisionPipeline::new(runner, bare_commands(None), tx), rx)
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn runs_all_stages_in_order_with_efi() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::default());
    let (pipeline, mut rx) = pipeline(runner.clone());

    let report = pipeline
        .run(fx.request().with_efi_dir(&fx.efi))
        .await
        .unwrap();

    assert_eq!(report.stages, Stage::ALL.to_vec());
    assert_eq!(pipeline.last_stage(), Some(Stage::CopyBootFiles));
    assert_eq!(report.device, fx.device);
    assert_eq!(report.boot_location, Some(PathBuf::from(format!("{}s1", fx.device))));
    assert_eq!(runner.programs(), vec!["diskutil", "dd", "sync", "cp"]);

    let calls = runner.calls();
    assert_eq!(
        calls[0].to_string(),
        format!("diskutil eraseDisk HFS+ USB_INSTALLER MBRFormat {}", fx.device)
    );
    assert_eq!(
        calls[1].to_string(),
        format!("dd if={} of={} bs=1m", fx.image.display(), fx.device)
    );
    assert_eq!(
        calls[3].to_string(),
        format!("cp -R {}/. {}s1/", fx.efi.display(), fx.device)
    );

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            Event::StageStarted {
                stage: Stage::Erase,
                device: fx.device.clone()
            },
            Event::StageCompleted { stage: Stage::Erase },
            Event::StageStarted {
                stage: Stage::WriteImage,
                device: fx.device.clone()
            },
            Event::StageCompleted {
                stage: Stage::WriteImage
            },
            Event::StageStarted {
                stage: Stage::CopyBootFiles,
                device: fx.device.clone()
            },
            Event::StageCompleted {
                stage: Stage::CopyBootFiles
            },
            Event::ProvisionComplete {
                device: fx.device.clone()
            },
        ]
    );
}

#[tokio::test]
async fn without_efi_only_erase_and_write_run() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::default());
    let (pipeline, mut rx) = pipeline(runner.clone());

    let report = pipeline.run(fx.request()).await.unwrap();

    assert_eq!(report.stages, vec![Stage::Erase, Stage::WriteImage]);
    assert_eq!(report.boot_location, None);
    assert_eq!(runner.programs(), vec!["diskutil", "dd", "sync"]);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::StageStarted {
            stage: Stage::CopyBootFiles,
            ..
        }
    )));
    assert!(matches!(events.last(), Some(Event::ProvisionComplete { .. })));
}

#[tokio::test]
async fn erase_failure_stops_the_pipeline() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::failing(
        "diskutil",
        CommandOutput::failure(1, "Could not find disk: /dev/disk4\n"),
    ));
    let (pipeline, mut rx) = pipeline(runner.clone());

    let err = pipeline
        .run(fx.request().with_efi_dir(&fx.efi))
        .await
        .unwrap_err();

    match &err {
        Error::StageFailed {
            stage,
            exit_code,
            output,
        } => {
            assert_eq!(*stage, Stage::Erase);
            assert_eq!(*exit_code, Some(1));
            assert_eq!(output, "Could not find disk: /dev/disk4");
        }
        other => panic!("expected StageFailed, got {:?}", other),
    }
    assert_eq!(runner.programs(), vec!["diskutil"]);
    assert_eq!(pipeline.last_stage(), Some(Stage::Erase));

    let events = drain(&mut rx);
    assert_eq!(
        events.last(),
        Some(&Event::ProvisionFailed {
            stage: Some(Stage::Erase),
            error: err.to_string(),
        })
    );
    assert!(!events.iter().any(|e| matches!(e, Event::StageCompleted { .. })));
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::StageStarted {
            stage: Stage::WriteImage,
            ..
        }
    )));
}

#[tokio::test]
async fn dd_failure_skips_sync_and_copy() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::failing(
        "dd",
        CommandOutput::failure(1, "dd: /dev/disk4: Resource busy"),
    ));
    let (pipeline, _rx) = pipeline(runner.clone());

    let err = pipeline
        .run(fx.request().with_efi_dir(&fx.efi))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::WriteImage));
    assert!(err.to_string().contains("Resource busy"));
    assert_eq!(runner.programs(), vec!["diskutil", "dd"]);
}

#[tokio::test]
async fn sync_failure_fails_the_write_stage() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::failing("sync", CommandOutput::failure(1, "")));
    let (pipeline, mut rx) = pipeline(runner.clone());

    let err = pipeline
        .run(fx.request().with_efi_dir(&fx.efi))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::WriteImage));
    assert!(err.to_string().contains("command exited with status 1"));
    assert_eq!(runner.programs(), vec!["diskutil", "dd", "sync"]);

    let events = drain(&mut rx);
    assert!(!events.contains(&Event::StageCompleted {
        stage: Stage::WriteImage
    }));
}

#[tokio::test]
async fn missing_image_runs_nothing() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::default());
    let (pipeline, mut rx) = pipeline(runner.clone());

    let request = ProvisionRequest::new(
        fx.image.with_file_name("monterey.raw"),
        ConfirmedDevice::confirm(&fx.device).unwrap(),
    );
    let err = pipeline.run(request).await.unwrap_err();

    assert!(matches!(err, Error::PreconditionUnmet(ref msg) if msg.contains("does not exist")));
    assert!(runner.calls().is_empty());
    assert_eq!(pipeline.last_stage(), None);
    assert_eq!(
        drain(&mut rx),
        vec![Event::ProvisionFailed {
            stage: None,
            error: err.to_string(),
        }]
    );
}

#[tokio::test]
async fn empty_image_runs_nothing() {
    let fx = Fixture::new();
    std::fs::write(&fx.image, b"").unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let (pipeline, _rx) = pipeline(runner.clone());

    let err = pipeline.run(fx.request()).await.unwrap_err();

    assert!(matches!(err, Error::PreconditionUnmet(ref msg) if msg.contains("is empty")));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn image_that_is_a_directory_is_rejected() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::default());
    let (pipeline, _rx) = pipeline(runner.clone());

    let request = ProvisionRequest::new(&fx.efi, ConfirmedDevice::confirm(&fx.device).unwrap());
    let err = pipeline.run(request).await.unwrap_err();

    assert!(matches!(err, Error::PreconditionUnmet(ref msg) if msg.contains("not a file")));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn missing_or_empty_efi_folder_runs_nothing() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::default());
    let (pipeline, _rx) = pipeline(runner.clone());

    let missing = fx.efi.with_file_name("NoSuchEFI");
    let err = pipeline
        .run(fx.request().with_efi_dir(&missing))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PreconditionUnmet(ref msg) if msg.contains("does not exist")));

    let empty = fx.efi.with_file_name("EmptyEFI");
    std::fs::create_dir(&empty).unwrap();
    let err = pipeline
        .run(fx.request().with_efi_dir(&empty))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PreconditionUnmet(ref msg) if msg.contains("is empty")));

    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn missing_boot_location_fails_copy_stage_without_running_cp() {
    let fx = Fixture::new();
    std::fs::remove_dir(format!("{}s1", fx.device)).unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let (pipeline, mut rx) = pipeline(runner.clone());

    let err = pipeline
        .run(fx.request().with_efi_dir(&fx.efi))
        .await
        .unwrap_err();

    match &err {
        Error::StageFailed {
            stage: Stage::CopyBootFiles,
            exit_code: None,
            output,
        } => assert!(output.contains("not found")),
        other => panic!("expected CopyBootFiles failure, got {:?}", other),
    }
    assert_eq!(runner.programs(), vec!["diskutil", "dd", "sync"]);

    let events = drain(&mut rx);
    assert!(events.contains(&Event::StageStarted {
        stage: Stage::CopyBootFiles,
        device: fx.device.clone(),
    }));
    assert!(matches!(
        events.last(),
        Some(Event::ProvisionFailed {
            stage: Some(Stage::CopyBootFiles),
            ..
        })
    ));
}

#[tokio::test]
async fn spawn_failure_is_a_stage_failure_without_exit_code() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner {
        unspawnable: Some("diskutil"),
        ..Default::default()
    });
    let (pipeline, _rx) = pipeline(runner.clone());

    let err = pipeline.run(fx.request()).await.unwrap_err();

    match err {
        Error::StageFailed {
            stage: Stage::Erase,
            exit_code: None,
            output,
        } => assert!(output.contains("No such file or directory")),
        other => panic!("expected spawn failure, got {:?}", other),
    }
    assert_eq!(runner.calls().len(), 1);
}

#[tokio::test]
async fn elevation_wraps_every_command() {
    let fx = Fixture::new();
    let runner = Arc::new(RecordingRunner::default());
    let (tx, _rx) = broadcast::channel(100);
    let pipeline = ProvisionPipeline::new(runner.clone(), bare_commands(Some("sudo")), tx);

    let _report = pipeline
        .run(fx.request().with_efi_dir(&fx.efi))
        .await
        .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|c| c.program == PathBuf::from("sudo")));
    let wrapped: Vec<_> = calls
        .iter()
        .map(|c| c.args[0].to_string_lossy().into_owned())
        .collect();
    assert_eq!(wrapped, vec!["diskutil", "dd", "sync", "cp"]);
}

#[test]
fn confirmation_rejects_blank_devices() {
    for input in ["", "   ", "\n"] {
        match ConfirmedDevice::confirm(input) {
            Err(Error::InvalidInput { field, .. }) => assert_eq!(field, "device"),
            other => panic!("expected InvalidInput for {:?}, got {:?}", input, other),
        }
    }
    assert!(ConfirmedDevice::confirm("/dev/disk\0").is_err());

    let device = ConfirmedDevice::confirm(" /dev/disk4 ").unwrap();
    assert_eq!(device.as_str(), "/dev/disk4");
    assert_eq!(device.to_string(), "/dev/disk4");
}

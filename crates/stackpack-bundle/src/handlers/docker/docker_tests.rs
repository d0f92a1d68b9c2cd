#![allow(non_snake_case)]

use super::*;
use std::collections::HashSet;
use std::sync::Mutex;
use test_case::test_case;

/// In-memory image store standing in for the container runtime.
#[derive(Default)]
struct FakeDocker {
    images: Mutex<HashSet<String>>,
    pullable: HashSet<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeDocker {
    fn with_images(local: &[&str], pullable: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            images: Mutex::new(local.iter().map(|s| s.to_string()).collect()),
            pullable: pullable.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn verbs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|args| args[..args.len().min(2)].join(" "))
            .collect()
    }
}

fn ok() -> CommandOutput {
    CommandOutput {
        code: Some(0),
        ..Default::default()
    }
}

fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(1),
        stderr: stderr.to_string(),
        ..Default::default()
    }
}

impl CommandRunner for FakeDocker {
    fn run(&self, command: &ExternalCommand, cancel: &CancelToken) -> BundleResult<CommandOutput> {
        cancel.check()?;
        self.calls.lock().unwrap().push(command.args.clone());
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        let mut images = self.images.lock().unwrap();
        let output = match args.as_slice() {
            ["image", "inspect", "--format", _, reference] => {
                if images.contains(*reference) {
                    ok()
                } else {
                    fail("Error: No such image")
                }
            }
            ["pull", reference] => {
                if self.pullable.contains(*reference) {
                    images.insert(reference.to_string());
                    ok()
                } else {
                    fail("pull access denied")
                }
            }
            ["tag", from, to] => {
                if images.contains(*from) {
                    images.insert(to.to_string());
                    ok()
                } else {
                    fail("No such image")
                }
            }
            ["save", "-o", path, reference] => {
                if images.contains(*reference) {
                    std::fs::write(path, format!("image:{reference}")).unwrap();
                    ok()
                } else {
                    fail("No such image")
                }
            }
            ["load", "-i", path] => {
                let content = std::fs::read_to_string(path).unwrap_or_default();
                match content.strip_prefix("image:") {
                    Some(reference) => {
                        images.insert(reference.to_string());
                        ok()
                    }
                    None => fail("invalid tar header"),
                }
            }
            _ => fail("unexpected command"),
        };
        Ok(output)
    }
}

fn entry(source: &str, dest: &str) -> ArtifactEntry {
    ArtifactEntry {
        kind: ArtifactKind::DockerImage,
        source: ArtifactSource::classify(ArtifactKind::DockerImage, source),
        dest: dest.to_string(),
        options: Default::default(),
    }
}

fn export(
    handler: &DockerImageHandler,
    entry: &ArtifactEntry,
    staging: &Path,
) -> BundleResult<ExportResult> {
    let cancel = CancelToken::new();
    handler.export(
        entry,
        &ExportContext {
            base_dir: Path::new("."),
            staging,
            cancel: &cancel,
        },
    )
}

#[test]
fn DockerImageHandler___export___saves_local_image_without_pull() {
    let docker = FakeDocker::with_images(&["app:1.0"], &[]);
    let handler = DockerImageHandler::new("docker", docker.clone());
    let staging = tempfile::tempdir().unwrap();

    let result = export(&handler, &entry("app:1.0", "app:1.0"), staging.path()).unwrap();

    assert_eq!(result.payload, "docker_image/app_1.0.tar");
    assert!(staging.path().join("docker_image/app_1.0.tar").is_file());
    assert_eq!(docker.verbs(), vec!["image inspect", "save -o"]);
}

#[test]
fn DockerImageHandler___export___pulls_and_retags() {
    let docker = FakeDocker::with_images(&[], &["registry.example/app:1.0"]);
    let handler = DockerImageHandler::new("docker", docker.clone());
    let staging = tempfile::tempdir().unwrap();

    export(
        &handler,
        &entry("docker://registry.example/app:1.0", "app:stable"),
        staging.path(),
    )
    .unwrap();

    assert_eq!(
        docker.verbs(),
        vec!["image inspect", "pull registry.example/app:1.0", "tag registry.example/app:1.0", "save -o"]
    );
    let saved = std::fs::read_to_string(staging.path().join("docker_image/app_stable.tar")).unwrap();
    assert_eq!(saved, "image:app:stable");
}

#[test]
fn DockerImageHandler___export___unpullable_image_is_not_found() {
    let docker = FakeDocker::with_images(&[], &[]);
    let handler = DockerImageHandler::new("docker", docker);
    let staging = tempfile::tempdir().unwrap();

    let err = export(&handler, &entry("missing:tag", "missing:tag"), staging.path()).unwrap_err();

    match err {
        BundleError::ArtifactNotFound { kind, entry, reason } => {
            assert_eq!(kind, ArtifactKind::DockerImage);
            assert_eq!(entry, "missing:tag");
            assert!(reason.contains("pull access denied"));
        }
        other => panic!("expected artifact not found, got {other:?}"),
    }
    assert!(!staging.path().join("docker_image/missing_tag.tar").exists());
}

#[test]
fn DockerImageHandler___import___loads_and_verifies() {
    let docker = FakeDocker::with_images(&[], &[]);
    let handler = DockerImageHandler::new("docker", docker.clone());
    let staging = tempfile::tempdir().unwrap();
    std::fs::create_dir(staging.path().join("docker_image")).unwrap();
    std::fs::write(staging.path().join("docker_image/app_1.0.tar"), "image:app:1.0").unwrap();
    let cancel = CancelToken::new();

    let result = handler
        .import(
            &entry("app:1.0", "app:1.0"),
            &ImportContext {
                staging: staging.path(),
                workspace: Path::new("/unused"),
                cancel: &cancel,
                payload_sha256: "abc",
                recorded_sha256: None,
            },
        )
        .unwrap();

    assert_eq!(result, ImportResult::Installed);
    assert!(docker.images.lock().unwrap().contains("app:1.0"));
}

#[test]
fn DockerImageHandler___import___recorded_and_present_is_already_present() {
    let docker = FakeDocker::with_images(&["app:1.0"], &[]);
    let handler = DockerImageHandler::new("docker", docker.clone());
    let cancel = CancelToken::new();

    let result = handler
        .import(
            &entry("app:1.0", "app:1.0"),
            &ImportContext {
                staging: Path::new("/unused"),
                workspace: Path::new("/unused"),
                cancel: &cancel,
                payload_sha256: "abc",
                recorded_sha256: Some("abc"),
            },
        )
        .unwrap();

    assert_eq!(result, ImportResult::AlreadyPresent);
    assert_eq!(docker.verbs(), vec!["image inspect"]);
}

#[test]
fn DockerImageHandler___import___load_failure_is_import_error() {
    let docker = FakeDocker::with_images(&[], &[]);
    let handler = DockerImageHandler::new("docker", docker);
    let staging = tempfile::tempdir().unwrap();
    std::fs::create_dir(staging.path().join("docker_image")).unwrap();
    std::fs::write(staging.path().join("docker_image/app_1.0.tar"), "garbage").unwrap();
    let cancel = CancelToken::new();

    let err = handler
        .import(
            &entry("app:1.0", "app:1.0"),
            &ImportContext {
                staging: staging.path(),
                workspace: Path::new("/unused"),
                cancel: &cancel,
                payload_sha256: "abc",
                recorded_sha256: None,
            },
        )
        .unwrap_err();

    assert!(matches!(err, BundleError::Import { kind: ArtifactKind::DockerImage, .. }));
}

#[test_case("app", true ; "bare name")]
#[test_case("app:1.0", true ; "name and tag")]
#[test_case("registry.example:5000/team/app:1.0", true ; "registry with port")]
#[test_case("app@sha256:abcdef", true ; "digest")]
#[test_case("", false ; "empty")]
#[test_case("bad name", false ; "whitespace")]
#[test_case("app:", false ; "dangling colon")]
#[test_case("/app", false ; "leading slash")]
fn is_image_reference___classifies(reference: &str, expected: bool) {
    assert_eq!(is_image_reference(reference), expected);
}

#[test]
fn DockerImageHandler___validate___rejects_options() {
    let handler = DockerImageHandler::new("docker", FakeDocker::with_images(&[], &[]));
    let mut entry = entry("app:1.0", "app:1.0");
    entry
        .options
        .insert("platform".to_string(), serde_yaml::Value::from("linux/amd64"));

    let err = handler.validate(&entry, "artifacts[0]").unwrap_err();

    assert!(err.to_string().contains("artifacts[0].options.platform"));
}

#[test]
fn KNOWN_IMAGES___references_are_valid_and_unique() {
    let mut seen = HashSet::new();
    for image in KNOWN_IMAGES {
        assert!(is_image_reference(image.reference), "{}", image.reference);
        assert!(seen.insert(image.reference));
    }
    assert!(find_known(KNOWN_IMAGES[0].reference).is_some());
    assert!(find_known("unknown:latest").is_none());
}

#![allow(non_snake_case)]

use super::*;
use crate::config::DeployConfig;
use test_case::test_case;

fn host() -> HostFacts {
    HostFacts {
        os: "linux".to_string(),
        arch: "x86_64".to_string(),
        gpu: None,
    }
}

fn parse(yaml: &str) -> BundleResult<Manifest> {
    let registry = HandlerRegistry::standard(&DeployConfig::default());
    Manifest::from_yaml(yaml, Path::new("/srv/release"), &registry, &host())
}

fn field_of(err: BundleError) -> String {
    match err {
        BundleError::Validation { field, .. } => field,
        other => panic!("expected validation error, got {other:?}"),
    }
}

const DEMO: &str = r#"
project: demo
version: 1.0.0
platform: { os: linux, arch: x86_64, gpu: none }
artifacts:
  - kind: source_code
    source: ./src
    dest: source
  - kind: cache
    source: ./cache
    dest: cache
    options: { compression_level: 3 }
  - kind: docker_image
    source: docker://registry.example/app:1.0
    dest: app:1.0
post_install:
  - scripts/setup.sh
  - { name: gpu-check, run: nvidia-smi, critical: false }
"#;

// Loading

#[test]
fn Manifest___from_yaml___parses_demo_manifest() {
    let manifest = parse(DEMO).unwrap();

    assert_eq!(manifest.project, "demo");
    assert_eq!(manifest.version, "1.0.0");
    assert_eq!(manifest.platform, Platform::new("linux", "x86_64", None));
    assert_eq!(manifest.artifacts.len(), 3);
    assert_eq!(manifest.artifacts[0].kind, ArtifactKind::SourceCode);
    assert_eq!(
        manifest.artifacts[0].source,
        ArtifactSource::Local(PathBuf::from("./src"))
    );
    assert_eq!(manifest.artifacts[1].option_u64("compression_level"), Some(3));
    assert_eq!(
        manifest.artifacts[2].source,
        ArtifactSource::Registry("registry.example/app:1.0".to_string())
    );
    assert_eq!(manifest.base_dir, PathBuf::from("/srv/release"));
}

#[test]
fn Manifest___from_yaml___keeps_artifact_order() {
    let manifest = parse(DEMO).unwrap();

    let kinds: Vec<_> = manifest.artifacts.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ArtifactKind::SourceCode,
            ArtifactKind::Cache,
            ArtifactKind::DockerImage
        ]
    );
}

#[test]
fn Manifest___from_yaml___expands_post_install_forms() {
    let manifest = parse(DEMO).unwrap();

    let shorthand = &manifest.post_install[0];
    assert_eq!(shorthand.name, "scripts/setup.sh");
    assert_eq!(shorthand.run, "scripts/setup.sh");
    assert!(shorthand.critical);
    assert!(!shorthand.sudo);

    let full = &manifest.post_install[1];
    assert_eq!(full.name, "gpu-check");
    assert_eq!(full.run, "nvidia-smi");
    assert!(!full.critical);
}

#[test]
fn Manifest___from_yaml___resolves_auto_platform() {
    let yaml = r#"
project: demo
version: 1.0.0
platform: { os: auto, arch: AUTO, gpu: auto }
artifacts: []
"#;
    let registry = HandlerRegistry::standard(&DeployConfig::default());
    let gpu_host = HostFacts {
        gpu: Some("nvidia".to_string()),
        ..host()
    };

    let manifest = Manifest::from_yaml(yaml, Path::new("."), &registry, &gpu_host).unwrap();

    assert_eq!(
        manifest.platform,
        Platform::new("linux", "x86_64", Some("nvidia"))
    );
}

#[test]
fn Manifest___from_yaml___absent_gpu_means_none() {
    let yaml = r#"
project: demo
version: 1.0.0
platform: { os: linux, arch: aarch64 }
"#;

    let manifest = parse(yaml).unwrap();

    assert_eq!(manifest.platform.gpu, None);
    assert_eq!(manifest.bundle_name(), "demo_1.0.0_linux_aarch64_nogpu.tar");
}

#[test]
fn Manifest___from_yaml___rejects_unknown_top_level_field() {
    let yaml = r#"
project: demo
version: 1.0.0
platform: { os: linux, arch: x86_64 }
artefacts: []
"#;

    let err = parse(yaml).unwrap_err();

    assert!(matches!(err, BundleError::Yaml(_)));
}

#[test]
fn Manifest___load___reads_file_and_sets_base_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.yaml");
    std::fs::write(&path, DEMO).unwrap();
    let registry = HandlerRegistry::standard(&DeployConfig::default());

    let manifest = Manifest::load_with(&path, &registry, &host()).unwrap();

    assert_eq!(manifest.base_dir, dir.path());
    assert_eq!(
        manifest.resolve_local(Path::new("./src")),
        dir.path().join("./src")
    );
}

#[test]
fn Manifest___load___missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = Manifest::load(dir.path().join("nope.yaml")).unwrap_err();

    assert!(matches!(err, BundleError::Io(_)));
    assert!(err.to_string().contains("nope.yaml"));
}

// Validation

#[test_case("version: 1.0.0\nplatform: { os: linux, arch: x86_64 }", "project" ; "missing project")]
#[test_case("project: demo\nplatform: { os: linux, arch: x86_64 }", "version" ; "missing version")]
#[test_case("project: demo\nversion: 1.0.0", "platform" ; "missing platform")]
#[test_case("project: demo\nversion: 1.0.0\nplatform: { arch: x86_64 }", "platform.os" ; "missing os")]
#[test_case("project: demo\nversion: 1.0.0\nplatform: { os: linux, arch: '' }", "platform.arch" ; "empty arch")]
#[test_case("project: 'my demo'\nversion: 1.0.0\nplatform: { os: linux, arch: x86_64 }", "project" ; "project with space")]
#[test_case("project: demo\nversion: '1.0'\nplatform: { os: linux, arch: x86_64 }", "version" ; "two part version")]
#[test_case("project: demo\nversion: v1.0.0\nplatform: { os: linux, arch: x86_64 }", "version" ; "prefixed version")]
#[test_case("project: demo\nversion: 1.0.0\nplatform: { os: linux_gnu, arch: x86_64 }", "platform.os" ; "underscore in os")]
fn Manifest___from_yaml___reports_field_path(yaml: &str, expected_field: &str) {
    let err = parse(yaml).unwrap_err();

    assert_eq!(field_of(err), expected_field);
}

fn with_artifacts(artifacts: &str) -> String {
    format!(
        "project: demo\nversion: 1.0.0\nplatform: {{ os: linux, arch: x86_64 }}\nartifacts:\n{artifacts}"
    )
}

#[test_case("  - { kind: tarball, source: ./a, dest: a }", "artifacts[0].kind" ; "unknown kind")]
#[test_case("  - { source: ./a, dest: a }", "artifacts[0].kind" ; "missing kind")]
#[test_case("  - { kind: source_code, dest: a }", "artifacts[0].source" ; "missing source")]
#[test_case("  - { kind: source_code, source: ./a }", "artifacts[0].dest" ; "missing dest")]
#[test_case("  - { kind: source_code, source: ./a, dest: /opt/a }", "artifacts[0].dest" ; "absolute dest")]
#[test_case("  - { kind: source_code, source: ./a, dest: ../a }", "artifacts[0].dest" ; "escaping dest")]
#[test_case("  - { kind: cache, source: ./c, dest: c/../../x }", "artifacts[0].dest" ; "nested escape")]
#[test_case("  - { kind: docker_image, source: 'app:1', dest: 'bad name' }", "artifacts[0].dest" ; "invalid image dest")]
#[test_case("  - { kind: source_code, source: 'https://h/src.zip', dest: a }", "artifacts[0].source" ; "remote without format")]
#[test_case("  - { kind: docker_image, source: 'https://h/app.tar', dest: 'app:1' }", "artifacts[0].source" ; "remote image")]
#[test_case("  - { kind: source_code, source: ./a, dest: a, options: { subset: x } }", "artifacts[0].options.subset" ; "unknown option")]
#[test_case("  - { kind: cache, source: ./c, dest: c, options: { compression_level: 12 } }", "artifacts[0].options.compression_level" ; "compression out of range")]
fn Manifest___from_yaml___rejects_bad_artifact(artifacts: &str, expected_field: &str) {
    let err = parse(&with_artifacts(artifacts)).unwrap_err();

    assert_eq!(field_of(err), expected_field);
}

#[test]
fn Manifest___from_yaml___accepts_remote_with_explicit_format() {
    let yaml = with_artifacts(
        "  - { kind: cache, source: 'https://h/download?id=7', dest: cache, options: { format: tar.gz, sha256: abc } }",
    );

    let manifest = parse(&yaml).unwrap();

    assert_eq!(
        manifest.artifacts[0].source,
        ArtifactSource::Remote("https://h/download?id=7".to_string())
    );
}

#[test]
fn Manifest___from_yaml___rejects_duplicate_dest_within_kind() {
    let yaml = with_artifacts(
        "  - { kind: source_code, source: ./a, dest: same }\n  - { kind: source_code, source: ./b, dest: same }",
    );

    let err = parse(&yaml).unwrap_err();

    assert_eq!(field_of(err), "artifacts[1].dest");
}

#[test_case("same", "same" ; "same dest")]
#[test_case("app", "app/.cache" ; "cache inside source")]
#[test_case("app/.cache", "app" ; "source around cache")]
#[test_case("./app", "app/" ; "spelled differently")]
fn Manifest___from_yaml___rejects_overlapping_dests_across_kinds(first: &str, second: &str) {
    let yaml = with_artifacts(&format!(
        "  - {{ kind: source_code, source: ./a, dest: '{first}' }}\n  - {{ kind: cache, source: ./b, dest: '{second}' }}"
    ));

    let err = parse(&yaml).unwrap_err();

    match err {
        BundleError::Validation { field, message } => {
            assert_eq!(field, "artifacts[1].dest");
            assert!(message.contains("artifacts[0].dest"), "{message}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn Manifest___from_yaml___allows_sibling_dests_with_shared_prefix() {
    let yaml = with_artifacts(
        "  - { kind: source_code, source: ./a, dest: app }\n  - { kind: cache, source: ./b, dest: app-cache }",
    );

    assert!(parse(&yaml).is_ok());
}

#[test]
fn Manifest___from_yaml___image_dest_does_not_overlap_trees() {
    let yaml = with_artifacts(
        "  - { kind: source_code, source: ./a, dest: app }\n  - { kind: docker_image, source: 'app:1', dest: app }",
    );

    assert!(parse(&yaml).is_ok());
}

#[test]
fn Manifest___from_yaml___rejects_colliding_payload_names() {
    let yaml = with_artifacts(
        "  - { kind: source_code, source: ./one/src, dest: a }\n  - { kind: source_code, source: ./two/src, dest: b }",
    );

    let err = parse(&yaml).unwrap_err();

    assert_eq!(field_of(err), "artifacts[1].source");
}

#[test_case("hd_map" ; "map data")]
#[test_case("ai_model" ; "model data")]
fn Manifest___from_yaml___data_kind_with_subset_loads(kind: &str) {
    let yaml = with_artifacts(&format!(
        "  - {{ kind: {kind}, source: ./data, dest: data, options: {{ subset: [city, highway] }} }}"
    ));

    let manifest = parse(&yaml).unwrap();

    assert_eq!(manifest.artifacts[0].kind.as_str(), kind);
    assert_eq!(manifest.artifacts[0].option_str_list("subset"), vec!["city", "highway"]);
}

#[test_case("hd_map" ; "map data")]
#[test_case("ai_model" ; "model data")]
fn Manifest___from_yaml___disabled_kind_fails_at_load(kind: &str) {
    let config = DeployConfig {
        disabled_kinds: vec![ArtifactKind::HdMap, ArtifactKind::AiModel],
        ..DeployConfig::default()
    };
    let registry = HandlerRegistry::standard(&config);
    let yaml = with_artifacts(&format!(
        "  - {{ kind: cache, source: ./cache, dest: cache }}\n  - {{ kind: {kind}, source: ./data, dest: data }}"
    ));

    let err = Manifest::from_yaml(&yaml, Path::new("/srv/release"), &registry, &host()).unwrap_err();

    match err {
        BundleError::UnsupportedKind { field, kind: found, reason } => {
            assert_eq!(field, "artifacts[1].kind");
            assert_eq!(found.as_str(), kind);
            assert!(reason.contains("disabled"));
        }
        other => panic!("expected unsupported kind, got {other:?}"),
    }
}

#[test]
fn Manifest___from_yaml___rejects_empty_post_install_run() {
    let yaml = "project: demo\nversion: 1.0.0\nplatform: { os: linux, arch: x86_64 }\npost_install:\n  - { name: x, run: '' }";

    let err = parse(yaml).unwrap_err();

    assert_eq!(field_of(err), "post_install[0].run");
}

// Serialization

#[test]
fn Manifest___to_yaml___reloads_to_same_manifest() {
    let manifest = parse(DEMO).unwrap();

    let yaml = manifest.to_yaml().unwrap();
    let reloaded = parse(&yaml).unwrap();

    assert_eq!(reloaded, manifest);
    assert!(yaml.contains("gpu: none"));
    assert!(!yaml.contains("base_dir"));
}

// ArtifactKind / ArtifactSource

#[test]
fn ArtifactKind___parse___accepts_every_display_form() {
    for kind in ArtifactKind::all() {
        assert_eq!(ArtifactKind::parse(&kind.to_string()), Some(*kind));
    }
    assert_eq!(ArtifactKind::parse("docker"), None);
}

#[test_case(ArtifactKind::SourceCode, "./src", ArtifactSource::Local(PathBuf::from("./src")) ; "local path")]
#[test_case(ArtifactKind::Cache, "https://h/c.tgz", ArtifactSource::Remote("https://h/c.tgz".into()) ; "https url")]
#[test_case(ArtifactKind::SourceCode, "http://h/s.tar", ArtifactSource::Remote("http://h/s.tar".into()) ; "http url")]
#[test_case(ArtifactKind::DockerImage, "app:1.0", ArtifactSource::Registry("app:1.0".into()) ; "registry reference")]
#[test_case(ArtifactKind::DockerImage, "docker://app:1.0", ArtifactSource::Registry("app:1.0".into()) ; "docker prefix")]
fn ArtifactSource___classify___picks_variant(kind: ArtifactKind, raw: &str, expected: ArtifactSource) {
    assert_eq!(ArtifactSource::classify(kind, raw), expected);
}

#[test]
fn ArtifactEntry___option_str_list___ignores_non_strings() {
    let options: ArtifactOptions =
        serde_yaml::from_str("exclude: ['*.log', 3, 'tmp']").unwrap();
    let entry = ArtifactEntry {
        kind: ArtifactKind::SourceCode,
        source: ArtifactSource::Local(PathBuf::from("./a")),
        dest: "a".to_string(),
        options,
    };

    assert_eq!(entry.option_str_list("exclude"), vec!["*.log", "tmp"]);
    assert_eq!(entry.option_str_list("missing"), Vec::<String>::new());
    assert_eq!(entry.label(), "source_code -> a");
}

#[test_case("1.0.0", true ; "plain")]
#[test_case("10.20.30", true ; "multi digit")]
#[test_case("1.0.0-rc.1", true ; "prerelease")]
#[test_case("1.0.0+build.5", true ; "build metadata")]
#[test_case("1.0.0-beta+exp.sha.5114f85", true ; "both suffixes")]
#[test_case("1.0", false ; "two parts")]
#[test_case("1.0.0.0", false ; "four parts")]
#[test_case("1.0.x", false ; "non numeric")]
#[test_case("1.0.0-", false ; "empty prerelease")]
#[test_case("1.0.0_1", false ; "underscore")]
fn is_semver___classifies(version: &str, expected: bool) {
    assert_eq!(is_semver(version), expected);
}

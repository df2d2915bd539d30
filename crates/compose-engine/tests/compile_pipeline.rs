//! End-to-end pipeline tests against a scripted external tool.
//!
//! No subprocess is spawned: the scripted tool records every invocation,
//! materializes output files the way ffmpeg would, and can be told to fail
//! or to trip the cancellation token mid-build.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use reelsmith_common::ComposeResult;
use reelsmith_compose_engine::tool::{MediaInfo, MediaTool, ToolStatus};
use reelsmith_compose_engine::{CancelToken, CompileEvent, Director, FsStorage};
use reelsmith_template_model::{ProjectConfig, TemplateDescriptor};

#[derive(Default)]
struct ScriptedTool {
    calls: Mutex<Vec<Vec<String>>>,

    /// Any invocation whose args contain one of these substrings exits 1.
    fail_matching: Vec<String>,

    /// Sleep before completing an invocation matching the substring.
    delays: Vec<(String, u64)>,

    /// Cancel this token on the first invocation.
    cancel_on_first: Mutex<Option<CancelToken>>,

    /// Manifest contents captured whenever a concat invocation runs.
    concat_manifests: Mutex<Vec<String>>,
}

impl ScriptedTool {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn render_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|args| !args.join(" ").contains("-f concat"))
            .count()
    }

    fn concat_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|args| args.join(" ").contains("-f concat"))
            .count()
    }
}

#[async_trait]
impl MediaTool for ScriptedTool {
    async fn execute(&self, args: &[String]) -> ComposeResult<ToolStatus> {
        self.calls.lock().unwrap().push(args.to_vec());
        let joined = args.join(" ");

        if let Some(token) = self.cancel_on_first.lock().unwrap().take() {
            token.cancel();
        }

        for (pattern, millis) in &self.delays {
            if joined.contains(pattern) {
                tokio::time::sleep(std::time::Duration::from_millis(*millis)).await;
            }
        }

        if joined.contains("-f concat") {
            let manifest_idx = args.iter().position(|a| a == "-i").unwrap() + 1;
            let contents = std::fs::read_to_string(&args[manifest_idx]).unwrap_or_default();
            self.concat_manifests.lock().unwrap().push(contents);
        }

        if self.fail_matching.iter().any(|p| joined.contains(p)) {
            return Ok(ToolStatus { rc: 1 });
        }

        // Materialize the output file like the real tool would.
        let output = args.last().unwrap();
        if let Some(parent) = Path::new(output).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(output, b"tool-output").unwrap();

        Ok(ToolStatus { rc: 0 })
    }

    async fn probe(&self, _source: &Path) -> ComposeResult<MediaInfo> {
        Ok(MediaInfo {
            duration: Some(3.672),
            video_codec: Some("h264".to_string()),
            audio_codec: Some("aac".to_string()),
            sample_rate: Some(48000),
        })
    }
}

struct Harness {
    root: tempfile::TempDir,
    tool: Arc<ScriptedTool>,
    events: Arc<Mutex<Vec<CompileEvent>>>,
}

impl Harness {
    fn new(tool: ScriptedTool) -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            tool: Arc::new(tool),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn source_file(&self, name: &str) -> PathBuf {
        let path = self.root.path().join("media").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"source-bytes").unwrap();
        path
    }

    fn config(&self, max_concurrent: usize) -> ProjectConfig {
        ProjectConfig {
            build_dir: Some(self.root.path().join("build")),
            assets_dir: Some(self.root.path().join("assets")),
            output_dir: Some(self.root.path().join("out")),
            max_concurrent_builds: Some(max_concurrent),
            ..Default::default()
        }
    }

    fn director(&self, config: ProjectConfig, descriptor: TemplateDescriptor) -> Director {
        let storage = Arc::new(FsStorage::new(self.root.path().join("downloads")));
        let events = self.events.clone();

        Director::configure(self.tool.clone(), storage, config, descriptor)
            .unwrap()
            .with_observer(Box::new(move |event| {
                events.lock().unwrap().push(event.clone());
            }))
    }

    fn progress_values(&self) -> Vec<f64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CompileEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    fn stopped_messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CompileEvent::TaskStopped { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.path().join("build").join("segments.list")
    }
}

fn video_sections_descriptor(sections: &[(&str, &Path, f64)]) -> TemplateDescriptor {
    let sections_json: Vec<String> = sections
        .iter()
        .map(|(name, source, duration)| {
            format!(
                r#"{{
                    "name": "{name}",
                    "type": "video",
                    "visibility": ["video_segment"],
                    "options": {{ "videoUrl": "{}", "duration": {duration} }},
                    "filters": []
                }}"#,
                source.display()
            )
        })
        .collect();

    let json = format!(
        r#"{{
            "global": {{
                "musicEnabled": false,
                "audioEnabled": false,
                "subtitlesEnabled": false,
                "blurEnabled": false
            }},
            "sections": [{}],
            "audios": [],
            "overlays": []
        }}"#,
        sections_json.join(",")
    );

    TemplateDescriptor::from_json_str(&json).unwrap()
}

#[tokio::test]
async fn single_section_compile_copies_segment_to_output() {
    let harness = Harness::new(ScriptedTool::default());
    let source = harness.source_file("sample.mp4");

    let descriptor = video_sections_descriptor(&[("intro", &source, 3.672)]);
    let director = harness.director(harness.config(1), descriptor);

    let result = director.construct().await.expect("compile should succeed");

    // relocated to <outputDir>/output.mp4
    let expected = harness.root.path().join("out").join("output.mp4");
    assert_eq!(result.final_video, expected);

    // single-entry manifest: output is a byte copy of the rendered segment
    assert_eq!(std::fs::read(&expected).unwrap(), b"tool-output");

    // exactly one render, no concat, no audio/caption/overlay invocation
    let calls = harness.tool.calls();
    assert_eq!(calls.len(), 1);
    let joined = calls[0].join(" ");
    assert!(!joined.contains("amix"));
    assert!(!joined.contains("ass="));
    assert!(!joined.contains("avgblur"));

    // progress reached exactly 1.0 and never regressed
    let progress = harness.progress_values();
    assert!((progress.last().unwrap() - 1.0).abs() < 1e-9);
    assert!(progress.windows(2).all(|w| w[1] >= w[0]));

    // scratch space purged after relocation
    assert!(!harness.manifest_path().exists());
}

#[tokio::test]
async fn failed_render_records_section_and_aborts() {
    let tool = ScriptedTool {
        fail_matching: vec!["broken_output".to_string()],
        ..Default::default()
    };
    let harness = Harness::new(tool);
    let source = harness.source_file("sample.mp4");

    let descriptor =
        video_sections_descriptor(&[("good", &source, 2.0), ("broken", &source, 2.0)]);
    let director = harness.director(harness.config(1), descriptor);

    let result = director.construct().await;
    assert!(result.is_none(), "failure must surface as an absent result");

    // the failed section is named in the terminal event
    let stopped = harness.stopped_messages();
    assert_eq!(stopped.len(), 1);
    assert!(stopped[0].contains("broken"));

    // finalize never ran: no concat, and the manifest was deleted
    assert_eq!(harness.tool.concat_calls(), 0);
    assert!(!harness.manifest_path().exists());
}

#[tokio::test]
async fn cancellation_stops_new_builds_and_skips_finalize() {
    let harness = Harness::new(ScriptedTool::default());
    let source = harness.source_file("sample.mp4");

    let descriptor =
        video_sections_descriptor(&[("first", &source, 2.0), ("second", &source, 2.0)]);
    let director = harness.director(harness.config(1), descriptor);

    // trip the token from inside the first render
    *harness.tool.cancel_on_first.lock().unwrap() = Some(director.cancel_token());

    let result = director.construct().await;
    assert!(result.is_none());

    // the dispatched build finished; the queued one never started
    assert_eq!(harness.tool.render_calls(), 1);
    assert_eq!(harness.tool.concat_calls(), 0);
    assert!(!harness.manifest_path().exists());

    let stopped = harness.stopped_messages();
    assert_eq!(stopped, vec!["task cancelled".to_string()]);
}

#[tokio::test]
async fn concurrent_builds_keep_manifest_in_declaration_order() {
    // completion order is reversed by per-section delays
    let tool = ScriptedTool {
        delays: vec![
            ("alpha_output".to_string(), 80),
            ("beta_output".to_string(), 40),
        ],
        ..Default::default()
    };
    let harness = Harness::new(tool);
    let source = harness.source_file("sample.mp4");

    let descriptor = video_sections_descriptor(&[
        ("alpha", &source, 1.0),
        ("beta", &source, 2.0),
        ("gamma", &source, 3.0),
    ]);
    let director = harness.director(harness.config(3), descriptor);

    let result = director.construct().await.expect("compile should succeed");
    assert!(result.final_video.ends_with("out/output.mp4"));

    // the concat stage saw the manifest in declaration order
    let manifests = harness.tool.concat_manifests.lock().unwrap().clone();
    assert_eq!(manifests.len(), 1);
    let entries: Vec<&str> = manifests[0].lines().collect();
    assert_eq!(entries.len(), 3);
    assert!(entries[0].ends_with("alpha_output.mp4"));
    assert!(entries[1].ends_with("beta_output.mp4"));
    assert!(entries[2].ends_with("gamma_output.mp4"));

    // progress stayed monotonic and terminal despite out-of-order completion
    let progress = harness.progress_values();
    assert!(progress.windows(2).all(|w| w[1] >= w[0]));
    assert!((progress.last().unwrap() - 1.0).abs() < 1e-9);
}

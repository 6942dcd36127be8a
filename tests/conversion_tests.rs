//! End-to-end conversion tests through the library API

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tempfile::TempDir;
use wdl2cwl::ir::{Literal, RuntimeValue};
use wdl2cwl::{
    load, write_tool, ConvertConfig, ConvertError, ConvertRequest, Converter, DiagnosticKind,
    UnitKind,
};

const MATRIX: &str = r#"version 1.0

workflow MatrixPipeline {
  input {
    Array[File] samples
    Int? cpu
  }

  call BuildMatrix { input: samples = samples }
  call ScoreMatrix { input: matrix = BuildMatrix.matrix, cpu = cpu }

  output {
    File scores = ScoreMatrix.scores
  }
}

task BuildMatrix {
  input {
    Array[File] samples
  }
  command <<<
    paste ~{sep=" " samples} > matrix.tsv
  >>>
  runtime {
    docker: "ubuntu:22.04"
  }
  output {
    File matrix = "matrix.tsv"
  }
}

task ScoreMatrix {
  input {
    File matrix
    Int? cpu
  }
  command <<<
    score --threads ~{select_first([cpu, 1])} ~{matrix} > scores.txt
  >>>
  runtime {
    cpu: select_first([cpu, 1])
    memory: "2 GiB"
  }
  output {
    File scores = "scores.txt"
  }
}
"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn request(input: PathBuf, out: &Path) -> ConvertRequest {
    ConvertRequest {
        input,
        output_dir: out.to_path_buf(),
        filter: Vec::new(),
        validate: false,
    }
}

fn read_yaml(path: &Path) -> Value {
    serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

async fn convert(input: PathBuf, out: &Path) -> wdl2cwl::ConversionReport {
    Converter::new(ConvertConfig::default())
        .convert(request(input, out))
        .await
        .unwrap()
}

#[tokio::test]
async fn matrix_pipeline_emits_two_tools_and_one_workflow() {
    let dir = TempDir::new().unwrap();
    let src = write(dir.path(), "matrix.wdl", MATRIX);
    let out = dir.path().join("out");

    let report = convert(src, &out).await;
    assert!(report.is_success(), "{:#?}", report);
    assert_eq!(report.units.len(), 3);

    assert!(out.join("tools/BuildMatrix.cwl").exists());
    assert!(out.join("tools/ScoreMatrix.cwl").exists());

    let workflow = read_yaml(&out.join("MatrixPipeline.cwl"));
    let step = &workflow["steps"]["ScoreMatrix"];
    assert_eq!(step["run"].as_str(), Some("tools/ScoreMatrix.cwl"));
    assert_eq!(step["in"]["matrix"]["source"].as_str(), Some("BuildMatrix/matrix"));
}

#[tokio::test]
async fn conversion_is_byte_identical_across_runs() {
    let dir = TempDir::new().unwrap();
    let src = write(dir.path(), "matrix.wdl", MATRIX);
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    convert(src.clone(), &first).await;
    convert(src, &second).await;

    for name in ["MatrixPipeline.cwl", "tools/BuildMatrix.cwl", "tools/ScoreMatrix.cwl"] {
        let a = fs::read(first.join(name)).unwrap();
        let b = fs::read(second.join(name)).unwrap();
        assert_eq!(a, b, "{} differs between runs", name);
    }
}

#[test]
fn task_outputs_map_one_to_one() {
    let src = r#"version 1.0
task Stats {
  input {
    File bam
  }
  command <<<
    samtools flagstat ~{bam} > stats.txt
    samtools view -c ~{bam}
  >>>
  output {
    File stats = "stats.txt"
    Int reads = read_int(stdout())
    Float ratio = read_float("ratio.txt")
    Boolean ok = read_boolean("ok.txt")
    String name = read_string("name.txt")
    File log = stderr()
  }
}
"#;
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "stats.wdl", src);
    let loaded = load(&path).unwrap();
    let tool = write_tool(&loaded.document.tasks[0], &path).unwrap();
    let doc: Value = serde_yaml::from_str(&tool.yaml).unwrap();

    let outputs = doc["outputs"].as_mapping().unwrap();
    assert_eq!(outputs.len(), 6);
    let types: Vec<&str> = ["stats", "reads", "ratio", "ok", "name", "log"]
        .iter()
        .map(|name| doc["outputs"][*name]["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["File", "int", "float", "boolean", "string", "stderr"]);
    assert_eq!(doc["outputs"]["ratio"]["outputBinding"]["loadContents"].as_bool(), Some(true));
}

#[tokio::test]
async fn scatter_over_files_iterates_files() {
    let src = r#"version 1.0
workflow PerSample {
  input {
    Array[File] reads
  }
  scatter (r in reads) {
    call Trim { input: fq = r }
  }
  output {
    Array[File] trimmed = Trim.out
  }
}
task Trim {
  input {
    File fq
  }
  command <<<
    trim ~{fq} > trimmed.fq
  >>>
  output {
    File out = "trimmed.fq"
  }
}
"#;
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "scatter.wdl", src);
    let out = dir.path().join("out");
    let report = convert(path, &out).await;
    assert!(report.is_success(), "{:#?}", report);

    let doc = read_yaml(&out.join("PerSample.cwl"));
    let step = &doc["steps"]["scatter_r"];
    assert_eq!(step["scatter"].as_str(), Some("r"));
    assert_eq!(step["in"]["r"]["source"].as_str(), Some("reads"));
    assert_eq!(step["run"]["inputs"]["r"]["type"].as_str(), Some("File"));
    assert_eq!(doc["outputs"]["trimmed"]["type"].as_str(), Some("File[]"));
}

#[tokio::test]
async fn optional_input_without_default_is_nullable() {
    let dir = TempDir::new().unwrap();
    let src = write(dir.path(), "matrix.wdl", MATRIX);
    let out = dir.path().join("out");
    convert(src, &out).await;

    let tool = read_yaml(&out.join("tools/ScoreMatrix.cwl"));
    assert_eq!(tool["inputs"]["cpu"]["type"].as_str(), Some("int?"));
    assert!(tool["inputs"]["cpu"].get("default").is_none());

    let workflow = read_yaml(&out.join("MatrixPipeline.cwl"));
    assert_eq!(workflow["inputs"]["cpu"]["type"].as_str(), Some("int?"));
    assert!(workflow["inputs"]["cpu"].get("default").is_none());
}

#[tokio::test]
async fn runtime_override_falls_back_to_default() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "matrix.wdl", MATRIX);

    let loaded = load(&path).unwrap();
    let task = loaded.namespace.task("ScoreMatrix").unwrap();
    let cpu = task.runtime.cpu.as_ref().unwrap();
    assert!(matches!(cpu, RuntimeValue::Override { .. }));

    let overridden: BTreeMap<String, Literal> = [("cpu".to_string(), Literal::Int(8))].into();
    assert_eq!(cpu.resolve(&overridden), Some(Literal::Int(8)));
    assert_eq!(cpu.resolve(&BTreeMap::new()), Some(Literal::Int(1)));

    let out = dir.path().join("out");
    convert(path, &out).await;
    let tool = read_yaml(&out.join("tools/ScoreMatrix.cwl"));
    let resources = tool["requirements"]
        .as_sequence()
        .unwrap()
        .iter()
        .find(|r| r["class"].as_str() == Some("ResourceRequirement"))
        .unwrap();
    assert_eq!(
        resources["coresMin"].as_str(),
        Some("$(inputs.cpu != null ? inputs.cpu : 1)")
    );
    assert_eq!(resources["ramMin"].as_u64(), Some(2048));
}

#[test]
fn import_cycle_is_reported() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.wdl", "version 1.0\nimport \"b.wdl\" as b\ntask A { command <<< true >>> }\n");
    write(dir.path(), "b.wdl", "version 1.0\nimport \"a.wdl\" as a\ntask B { command <<< true >>> }\n");

    let err = load(&dir.path().join("a.wdl")).unwrap_err();
    match &err {
        ConvertError::Cycle { chain } => {
            assert_eq!(chain.len(), 3);
            assert_eq!(chain.first(), chain.last());
        }
        other => panic!("expected cycle, got {}", other),
    }
    assert!(err.to_string().starts_with("WDL-050"));
}

#[tokio::test]
async fn undeclared_placeholder_names_the_marker() {
    let src = r#"version 1.0
task Typo {
  input {
    File reads
  }
  command <<<
    wc -l ~{raeds}
  >>>
}
"#;
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "typo.wdl", src);
    let report = convert(path, &dir.path().join("out")).await;

    let unit = report.unit("Typo").unwrap();
    assert!(!unit.success);
    assert_eq!(unit.kind, UnitKind::Task);
    let diagnostic = &unit.diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::UnresolvedReference);
    assert!(diagnostic.message.contains("'raeds'"), "{}", diagnostic.message);
}

#[tokio::test]
async fn one_malformed_file_does_not_stop_the_batch() {
    let dir = TempDir::new().unwrap();
    let inputs = dir.path().join("wdl");
    for i in 0..10 {
        let body = if i == 4 {
            // Heredoc never closed
            format!("version 1.0\ntask T{} {{\n  command <<<\n    echo {}\n}}\n", i, i)
        } else {
            format!(
                "version 1.0\ntask T{} {{\n  command <<<\n    echo {}\n  >>>\n  output {{\n    File out = stdout()\n  }}\n}}\n",
                i, i
            )
        };
        write(&inputs, &format!("nested/t{}.wdl", i), &body);
    }
    write(&inputs, "README.md", "not a source file");

    let out = dir.path().join("out");
    let report = convert(inputs, &out).await;

    assert_eq!(report.units.len(), 10);
    assert_eq!(report.succeeded(), 9);
    assert_eq!(report.failed(), 1);
    let broken = report.units.iter().find(|u| !u.success).unwrap();
    assert_eq!(broken.unit, "t4");
    assert_eq!(broken.kind, UnitKind::File);
    assert_eq!(broken.diagnostics[0].kind, DiagnosticKind::Parse);
    assert!(out.join("tools/T3.cwl").exists());
    assert!(!out.join("tools/T4.cwl").exists());
}

#[tokio::test]
async fn imported_tasks_are_written_as_tools() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "lib/tasks.wdl",
        "version 1.0\ntask Hello {\n  input {\n    String who\n  }\n  command <<<\n    echo hi ~{who}\n  >>>\n  output {\n    File out = stdout()\n  }\n}\n",
    );
    let main = write(
        dir.path(),
        "main.wdl",
        "version 1.0\nimport \"lib/tasks.wdl\" as lib\nworkflow Main {\n  call lib.Hello { input: who = \"world\" }\n  output {\n    File greeting = Hello.out\n  }\n}\n",
    );
    let out = dir.path().join("out");
    let report = convert(main, &out).await;
    assert!(report.is_success(), "{:#?}", report);

    let doc = read_yaml(&out.join("Main.cwl"));
    assert_eq!(doc["steps"]["Hello"]["run"].as_str(), Some("tools/Hello.cwl"));
    assert_eq!(doc["steps"]["Hello"]["in"]["who"]["default"].as_str(), Some("world"));
    assert!(out.join("tools/Hello.cwl").exists());
}

#[tokio::test]
async fn custom_tools_dir_is_used_for_run_paths() {
    let dir = TempDir::new().unwrap();
    let src = write(dir.path(), "matrix.wdl", MATRIX);
    let out = dir.path().join("out");
    let config = ConvertConfig::from_yaml("tools_dir: clt\n").unwrap();

    let report = Converter::new(config).convert(request(src, &out)).await.unwrap();
    assert!(report.is_success());
    assert!(out.join("clt/BuildMatrix.cwl").exists());
    let doc = read_yaml(&out.join("MatrixPipeline.cwl"));
    assert_eq!(doc["steps"]["BuildMatrix"]["run"].as_str(), Some("clt/BuildMatrix.cwl"));
}

#[tokio::test]
async fn subworkflow_lifted_inputs_are_bound_by_the_caller() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "sub.wdl",
        r#"version 1.0
workflow Sub {
  call Echo
  output {
    File said = Echo.out
  }
}

task Echo {
  input {
    String msg
  }
  command <<<
    echo ~{msg}
  >>>
  output {
    File out = stdout()
  }
}
"#,
    );
    let main = write(
        dir.path(),
        "main.wdl",
        "version 1.0\nimport \"sub.wdl\" as s\nworkflow Main {\n  call s.Sub\n  output {\n    File said = Sub.said\n  }\n}\n",
    );
    let out = dir.path().join("out");
    let report = convert(main, &out).await;
    assert!(report.is_success(), "{:#?}", report);

    let sub = read_yaml(&out.join("Sub.cwl"));
    assert_eq!(sub["inputs"]["Echo_msg"]["type"].as_str(), Some("string"));

    let doc = read_yaml(&out.join("Main.cwl"));
    assert_eq!(doc["inputs"]["Sub_Echo_msg"]["type"].as_str(), Some("string"));
    assert_eq!(
        doc["steps"]["Sub"]["in"]["Echo_msg"]["source"].as_str(),
        Some("Sub_Echo_msg")
    );
    assert_eq!(doc["steps"]["Sub"]["run"].as_str(), Some("Sub.cwl"));
}

#[tokio::test]
async fn runtime_fallbacks_survive_in_the_tool() {
    let src = r#"version 1.0
task Align {
  input {
    File reads
    String? docker_override
    String? mem
  }
  command <<<
    align ~{reads}
  >>>
  runtime {
    docker: select_first([docker_override, "ubuntu:22.04"])
    memory: select_first([mem, "4 GiB"])
  }
}
"#;
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "align.wdl", src);
    let out = dir.path().join("out");
    let report = convert(path, &out).await;
    assert!(report.is_success(), "{:#?}", report);

    let doc = read_yaml(&out.join("tools/Align.cwl"));
    assert_eq!(doc["hints"][0]["dockerPull"].as_str(), Some("$(inputs.docker_override)"));
    assert_eq!(
        doc["inputs"]["docker_override"]["default"].as_str(),
        Some("ubuntu:22.04")
    );

    let ram = doc["requirements"]
        .as_sequence()
        .unwrap()
        .iter()
        .find(|r| r["class"].as_str() == Some("ResourceRequirement"))
        .unwrap()["ramMin"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(ram.contains("inputs.mem != null ? inputs.mem : \"4 GiB\""), "{}", ram);
    assert!(ram.contains("/ 1048576"), "{}", ram);
}

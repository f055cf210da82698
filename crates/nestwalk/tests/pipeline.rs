//! End-to-end tests for pipeline compilation and traversal
//!
//! Pipelines are compiled from TOML or built node by node, then applied to
//! directory trees and ZIP archives created in temp directories.

use nestwalk::{
    Capability, ConfigNode, EngineError, ExecutionContext, FileProcessor, ManagerOptions,
    PipelineConfig, Processor, ProcessorBase, ProcessorError, ProcessorManager,
    ProcessorRegistry, Properties, ResolutionMode, StructureEntry, CALCULATED_CLAIMANT,
};
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

const ABC_MD5: &str = "900150983cd24fb0d6963f7d28e17f72";
const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

// ============================================================================
// Fixtures
// ============================================================================

/// File processor that records every path it sees under its alias.
///
/// Attribute `fail` makes it fail after reading: `io` with a plain I/O
/// error, `processor` with an already attributed processor error.
#[derive(Default)]
struct Recorder {
    base: ProcessorBase,
}

impl Recorder {
    const IMPLEMENTATION: &'static str = "test.Recorder";

    fn record(
        &self,
        path: &str,
        input: &mut dyn Read,
        ctx: &mut ExecutionContext,
    ) -> nestwalk::Result<()> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        match self.base.attribute("fail") {
            Some("io") => return Err(io::Error::new(io::ErrorKind::Other, "disk on fire").into()),
            Some("processor") => {
                let inner = ProcessorError::new("deep", "inspect", "inner failure");
                return Err(EngineError::Processor(inner));
            }
            _ => {}
        }
        ctx.associate(
            self.alias(),
            path,
            [("bytes".to_string(), bytes.len().to_string())],
        );
        Ok(())
    }
}

impl Processor for Recorder {
    fn base(&self) -> &ProcessorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcessorBase {
        &mut self.base
    }

    fn capability(&self) -> Capability<'_> {
        Capability::File(self)
    }
}

impl FileProcessor for Recorder {
    fn process(
        &self,
        _operation: &str,
        input: &mut dyn Read,
        _output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> nestwalk::Result<()> {
        let path = ctx.current_name().to_string();
        self.record(&path, input, ctx)
    }

    fn process_entry(
        &self,
        _operation: &str,
        entry: &StructureEntry,
        input: &mut dyn Read,
        _output: Option<&mut dyn Write>,
        ctx: &mut ExecutionContext,
    ) -> nestwalk::Result<()> {
        self.record(&entry.path, input, ctx)
    }
}

fn registry() -> Arc<ProcessorRegistry> {
    let mut registry = ProcessorRegistry::with_builtins();
    registry.register(Recorder::IMPLEMENTATION, || Box::<Recorder>::default());
    Arc::new(registry)
}

fn declaration(operation: &str, implementation: &str) -> ConfigNode {
    ConfigNode::new(operation).with_namespace(format!("processor:{}", implementation))
}

fn prepared(root: ConfigNode, properties: Properties) -> ProcessorManager {
    let mut manager = ProcessorManager::new(registry(), properties, root);
    manager.prepare().unwrap();
    manager
}

fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Single stored member whose sizes and CRC follow the data in a data
/// descriptor (general purpose flag bit 3), as streaming writers emit them.
fn data_descriptor_zip(name: &str, data: &[u8]) -> Vec<u8> {
    let crc = crc32fast::hash(data);
    let size = data.len() as u32;
    let name_len = name.len() as u16;
    let mut out = Vec::new();

    // Local header with zeroed CRC and sizes.
    out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    for field in [20u16, 0x0008, 0, 0, 0x0021] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    for field in [0u32, 0, 0] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(data);

    // Data descriptor.
    for field in [0x0807_4b50u32, crc, size, size] {
        out.extend_from_slice(&field.to_le_bytes());
    }

    // Central directory.
    let directory_offset = out.len() as u32;
    out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
    for field in [20u16, 20, 0x0008, 0, 0, 0x0021] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    for field in [crc, size, size] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    for field in [name_len, 0, 0, 0, 0] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    for field in [0u32, 0] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    let directory_size = out.len() as u32 - directory_offset;

    // End of central directory.
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    for field in [0u16, 0, 1, 1] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(&directory_size.to_le_bytes());
    out.extend_from_slice(&directory_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Temp directories for one test: the tree to walk and the scratch dir
/// handed to structure processors.
struct TestEnv {
    _temp: TempDir,
    pub tree: PathBuf,
    pub scratch: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let tree = temp.path().join("tree");
        let scratch = temp.path().join("scratch");
        fs::create_dir_all(&tree).expect("Failed to create tree dir");
        fs::create_dir_all(&scratch).expect("Failed to create scratch dir");
        Self {
            _temp: temp,
            tree,
            scratch,
        }
    }

    fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.tree.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    fn scratch_entries(&self) -> usize {
        fs::read_dir(&self.scratch).expect("Failed to list scratch dir").count()
    }
}

fn calculated_paths(ctx: &ExecutionContext) -> Vec<String> {
    ctx.associated_for(CALCULATED_CLAIMANT)
        .into_iter()
        .map(|record| record.path)
        .collect()
}

// ============================================================================
// Archive traversal
// ============================================================================

#[test]
fn test_zip_records_only_matched_members() {
    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.ZipProcessor").with_child(
            declaration("process", "nestwalk.file.Checksum").with_attribute("pattern", "*.txt"),
        ),
    );
    let manager = prepared(root, Properties::new());
    let archive = build_zip(&[("notes.txt", b"abc"), ("image.bin", b"\x89PNG")]);

    let mut ctx = ExecutionContext::new("bundle.zip");
    manager
        .apply("bundle.zip", &mut Cursor::new(archive), None, &mut ctx)
        .unwrap();

    assert_eq!(ctx.depth(), 0);
    ctx.verify_balanced().unwrap();

    let records = ctx.associated_information();
    assert_eq!(records.len(), 1);
    let notes = &records[0];
    assert_eq!(notes.claimant, CALCULATED_CLAIMANT);
    assert_eq!(notes.path, "notes.txt");
    assert_eq!(notes.properties["size"], "3");
    assert_eq!(notes.properties["md5"], ABC_MD5);
    assert_eq!(notes.properties["sha-256"], ABC_SHA256);
}

#[test]
fn test_zip_inside_zip_is_extracted_and_cleaned_up() {
    let env = TestEnv::new();
    let config = format!(
        r#"
[pipeline]
name = "pipeline"

[[pipeline.children]]
name = "process"
namespace = "processor:nestwalk.structure.ZipProcessor#outer"
attributes = {{ temp-dir = "{scratch}", digests = "crc32" }}

[[pipeline.children.children]]
name = "process"
namespace = "processor:nestwalk.structure.ZipProcessor#inner"
attributes = {{ pattern = "*.zip", temp-dir = "{scratch}", digests = "crc32" }}

[[pipeline.children.children.children]]
name = "process"
namespace = "processor:nestwalk.file.Checksum"
"#,
        scratch = env.scratch.display().to_string().replace('\\', "/")
    );
    let pipeline = PipelineConfig::from_toml_str(&config).unwrap();
    let manager = prepared(pipeline.pipeline, Properties::new());

    let inner = build_zip(&[("notes.txt", b"abc"), ("deep/data.csv", b"a,b\n")]);
    let outer = build_zip(&[("inner.zip", inner.as_slice()), ("skipped.txt", b"not matched")]);

    let mut ctx = ExecutionContext::new("outer.zip");
    manager
        .apply("outer.zip", &mut Cursor::new(outer), None, &mut ctx)
        .unwrap();

    assert_eq!(
        calculated_paths(&ctx),
        vec!["inner.zip", "inner.zip/deep/data.csv", "inner.zip/notes.txt"]
    );
    let notes = ctx
        .associated_for(CALCULATED_CLAIMANT)
        .into_iter()
        .find(|r| r.path == "inner.zip/notes.txt")
        .unwrap();
    assert_eq!(notes.properties["crc32"], "891568578");
    assert_eq!(env.scratch_entries(), 0);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn test_zip_rewrite_replaces_transformed_members() {
    let rules = declaration("process", "nestwalk.file.RegexReplace#fix")
        .with_attribute("pattern", "*.txt")
        .with_child(
            ConfigNode::new("rule")
                .with_attribute("pattern", "abc")
                .with_attribute("replacement", "xyz"),
        );
    let root = ConfigNode::new("pipeline")
        .with_child(declaration("process", "nestwalk.structure.ZipProcessor").with_child(rules));
    let manager = prepared(root, Properties::new());
    let archive = build_zip(&[("notes.txt", b"abc abc"), ("image.bin", b"\x00\x01\x02")]);

    let mut ctx = ExecutionContext::new("bundle.zip");
    let mut rewritten = Vec::new();
    manager
        .apply(
            "bundle.zip",
            &mut Cursor::new(archive),
            Some(&mut rewritten),
            &mut ctx,
        )
        .unwrap();

    let mut output = ZipArchive::new(Cursor::new(rewritten)).unwrap();
    let mut text = String::new();
    output.by_name("notes.txt").unwrap().read_to_string(&mut text).unwrap();
    assert_eq!(text, "xyz xyz");
    let mut image = Vec::new();
    output.by_name("image.bin").unwrap().read_to_end(&mut image).unwrap();
    assert_eq!(image, b"\x00\x01\x02");

    assert_eq!(ctx.associated_for("fix")[0].properties["replacements"], "2");
    // Digests describe the original member bytes.
    assert_eq!(ctx.associated_for(CALCULATED_CLAIMANT)[0].properties["size"], "7");
}

#[test]
fn test_zip_rewrite_keeps_member_metadata() {
    let modified = DateTime::from_date_and_time(2021, 6, 15, 12, 30, 0).unwrap();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(modified)
        .unix_permissions(0o640);
    writer.start_file("raw.bin", stored).unwrap();
    writer.write_all(b"\x00\x01\x02\x03").unwrap();
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(modified);
    writer.start_file("notes.txt", deflated).unwrap();
    writer.write_all(b"abc").unwrap();
    let archive = writer.finish().unwrap().into_inner();

    let rules = declaration("process", "nestwalk.file.RegexReplace#fix")
        .with_attribute("pattern", "*.txt")
        .with_child(
            ConfigNode::new("rule")
                .with_attribute("pattern", "abc")
                .with_attribute("replacement", "xyz"),
        );
    let root = ConfigNode::new("pipeline")
        .with_child(declaration("process", "nestwalk.structure.ZipProcessor").with_child(rules));
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("bundle.zip");
    let mut rewritten = Vec::new();
    manager
        .apply(
            "bundle.zip",
            &mut Cursor::new(archive),
            Some(&mut rewritten),
            &mut ctx,
        )
        .unwrap();

    let mut output = ZipArchive::new(Cursor::new(rewritten)).unwrap();
    {
        let raw = output.by_name("raw.bin").unwrap();
        assert_eq!(raw.compression(), CompressionMethod::Stored);
        assert_eq!(raw.unix_mode().map(|mode| mode & 0o777), Some(0o640));
        let when = raw.last_modified().unwrap();
        assert_eq!(
            (when.year(), when.month(), when.day(), when.hour(), when.minute()),
            (2021, 6, 15, 12, 30)
        );
    }
    let mut notes = output.by_name("notes.txt").unwrap();
    assert_eq!(notes.compression(), CompressionMethod::Deflated);
    assert_eq!(notes.last_modified().unwrap().year(), 2021);
    let mut text = String::new();
    notes.read_to_string(&mut text).unwrap();
    assert_eq!(text, "xyz");
}

#[test]
fn test_empty_zip_has_no_members() {
    let env = TestEnv::new();
    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.ZipProcessor")
            .with_attribute("temp-dir", env.scratch.display().to_string())
            .with_child(declaration("process", "nestwalk.file.Checksum")),
    );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("empty.zip");
    manager
        .apply("empty.zip", &mut Cursor::new(build_zip(&[])), None, &mut ctx)
        .unwrap();
    assert!(ctx.associated_information().is_empty());

    let mut rewritten = Vec::new();
    manager
        .apply(
            "empty.zip",
            &mut Cursor::new(build_zip(&[])),
            Some(&mut rewritten),
            &mut ctx,
        )
        .unwrap();
    assert_eq!(ZipArchive::new(Cursor::new(rewritten)).unwrap().len(), 0);
    assert_eq!(ctx.depth(), 0);
    assert_eq!(env.scratch_entries(), 0);
}

#[test]
fn test_data_descriptor_members_are_read() {
    let env = TestEnv::new();
    let streamed = data_descriptor_zip("notes.txt", b"abc");
    env.write_file("l1/streamed.zip", &streamed);

    let archive_action = || {
        declaration("process", "nestwalk.structure.ZipProcessor")
            .with_attribute("pattern", "*.zip")
            .with_attribute("temp-dir", env.scratch.display().to_string())
            .with_child(
                declaration("process", "nestwalk.file.Checksum").with_attribute("pattern", "*.txt"),
            )
    };

    // As a top-level stream.
    let root = ConfigNode::new("pipeline").with_child(archive_action());
    let manager = prepared(root, Properties::new());
    let mut ctx = ExecutionContext::new("streamed.zip");
    manager
        .apply("streamed.zip", &mut Cursor::new(streamed), None, &mut ctx)
        .unwrap();
    let records = ctx.associated_for(CALCULATED_CLAIMANT);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "notes.txt");
    assert_eq!(records[0].properties["md5"], ABC_MD5);

    // Nested below a directory.
    let walker = declaration("process", "nestwalk.structure.DirectoryWalker")
        .with_attribute("temp-dir", env.scratch.display().to_string())
        .with_child(archive_action());
    let manager = prepared(ConfigNode::new("pipeline").with_child(walker), Properties::new());
    let mut ctx = ExecutionContext::new("tree");
    manager.apply_path("tree", &env.tree, &mut ctx).unwrap();
    assert_eq!(
        calculated_paths(&ctx),
        vec!["l1/streamed.zip", "l1/streamed.zip/notes.txt"]
    );
    assert_eq!(env.scratch_entries(), 0);
}

// ============================================================================
// Directory traversal
// ============================================================================

#[test]
fn test_zip_members_are_selected_by_path_inside_archive() {
    let env = TestEnv::new();
    let bundle = build_zip(&[
        ("docs/a.csv", b"a,b\n"),
        ("other/docs/b.csv", b"c,d\n"),
        ("readme.md", b"hi"),
    ]);
    env.write_file("l1/bundle.zip", &bundle);

    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker")
            .with_attribute("temp-dir", env.scratch.display().to_string())
            .with_child(
                declaration("process", "nestwalk.structure.ZipProcessor")
                    .with_attribute("pattern", "*.zip")
                    .with_child(
                        declaration("process", "nestwalk.file.Checksum")
                            .with_attribute("pattern", "docs/*.csv"),
                    ),
            ),
    );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("tree");
    manager.apply_path("tree", &env.tree, &mut ctx).unwrap();

    assert_eq!(
        calculated_paths(&ctx),
        vec!["l1/bundle.zip", "l1/bundle.zip/docs/a.csv"]
    );
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn test_directory_tree_with_nested_zip() {
    let env = TestEnv::new();
    env.write_file("l1/top.txt", b"top");
    env.write_file("l1/ignored.dat", b"nope");
    let bundle = build_zip(&[("notes.txt", b"abc"), ("docs/readme.md", b"hi")]);
    env.write_file("l1/l2/bundle.zip", &bundle);

    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker")
            .with_attribute("temp-dir", "${scratch}")
            .with_child(
                declaration("process", "nestwalk.structure.ZipProcessor")
                    .with_attribute("pattern", "*.zip")
                    .with_child(declaration("process", "nestwalk.file.Checksum")),
            )
            .with_child(
                declaration("process", "nestwalk.file.Checksum").with_attribute("pattern", "*.txt"),
            ),
    );
    let properties: Properties = [("scratch", env.scratch.display().to_string())]
        .into_iter()
        .collect();
    let manager = prepared(root, properties);

    let mut ctx = ExecutionContext::new("tree");
    manager.apply_path("tree", &env.tree, &mut ctx).unwrap();

    assert_eq!(
        calculated_paths(&ctx),
        vec![
            "l1/l2/bundle.zip",
            "l1/l2/bundle.zip/docs/readme.md",
            "l1/l2/bundle.zip/notes.txt",
            "l1/top.txt",
        ]
    );
    assert_eq!(ctx.depth(), 0);
    assert_eq!(env.scratch_entries(), 0);
}

#[test]
fn test_first_matching_action_wins() {
    let env = TestEnv::new();
    env.write_file("report.xml", b"<r/>");
    env.write_file("notes.xsd", b"<s/>");

    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker")
            .with_child(
                declaration("process", "test.Recorder#first").with_attribute("pattern", "*.xml"),
            )
            .with_child(
                declaration("process", "test.Recorder#second").with_attribute("pattern", "*.x??"),
            ),
    );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("tree");
    manager.apply_path("tree", &env.tree, &mut ctx).unwrap();

    let first: Vec<_> = ctx.associated_for("first").into_iter().map(|r| r.path).collect();
    let second: Vec<_> = ctx.associated_for("second").into_iter().map(|r| r.path).collect();
    assert_eq!(first, vec!["report.xml"]);
    assert_eq!(second, vec!["notes.xsd"]);
}

#[test]
fn test_each_directory_level_gets_its_own_context() {
    let env = TestEnv::new();
    for name in ["c.txt", "a.txt", "b/inner.txt"] {
        env.write_file(name, b"x");
    }
    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker")
            .with_child(declaration("process", "nestwalk.file.Checksum")),
    );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("run");
    manager.apply_path("tree", &env.tree, &mut ctx).unwrap();

    // Name order within a level: c.txt is the last file the top level saw.
    let top = ctx.values_at(&["tree"]).unwrap();
    assert_eq!(top.get("checksummed").map(String::as_str), Some("c.txt"));
    let nested = ctx.values_at(&["tree", "b"]).unwrap();
    assert_eq!(nested.get("checksummed").map(String::as_str), Some("b/inner.txt"));
    assert_eq!(ctx.children().collect::<Vec<_>>(), vec!["tree"]);
}

// ============================================================================
// Failures and cleanup
// ============================================================================

#[test]
fn test_corrupt_nested_zip_fails_without_leaking_temp_files() {
    let env = TestEnv::new();
    env.write_file(
        "broken.zip",
        b"this is not an archive at all, only a few lines of plain text\n",
    );

    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker")
            .with_attribute("temp-dir", env.scratch.display().to_string())
            .with_child(
                declaration("process", "nestwalk.structure.ZipProcessor")
                    .with_attribute("pattern", "*.zip")
                    .with_child(declaration("process", "nestwalk.file.Checksum")),
            ),
    );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("tree");
    let result = manager.apply_path("tree", &env.tree, &mut ctx);

    assert!(matches!(result, Err(EngineError::Zip(_))));
    assert_eq!(env.scratch_entries(), 0);
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn test_file_failures_are_attributed_once() {
    let env = TestEnv::new();
    env.write_file("data.bin", b"payload");

    let failing = |mode: &str| {
        ConfigNode::new("pipeline").with_child(
            declaration("process", "nestwalk.structure.DirectoryWalker")
                .with_child(
                    declaration("process", "test.Recorder#faulty").with_attribute("fail", mode),
                ),
        )
    };

    let manager = prepared(failing("io"), Properties::new());
    let mut ctx = ExecutionContext::new("tree");
    let err = manager.apply_path("tree", &env.tree, &mut ctx).unwrap_err();
    let processor_error = err.as_processor_error().unwrap();
    assert_eq!(processor_error.target(), "faulty:process");
    assert_eq!(processor_error.message, "disk on fire");
    assert_eq!(ctx.depth(), 0);

    let manager = prepared(failing("processor"), Properties::new());
    let mut ctx = ExecutionContext::new("tree");
    let err = manager.apply_path("tree", &env.tree, &mut ctx).unwrap_err();
    assert_eq!(err.as_processor_error().unwrap().target(), "deep:inspect");
}

#[test]
fn test_validate_operation_stops_walk_on_bad_signature() {
    let env = TestEnv::new();
    env.write_file("good.pdf", b"%PDF-1.4 body");
    env.write_file("bad.pdf", b"GIF89a");

    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker").with_child(
            declaration("validate", "nestwalk.file.SignatureValidator#pdf")
                .with_attribute("pattern", "*.pdf")
                .with_attribute("magic", "25504446"),
        ),
    );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("tree");
    let err = manager.apply_path("tree", &env.tree, &mut ctx).unwrap_err();
    assert_eq!(err.as_processor_error().unwrap().target(), "pdf:validate");
    // bad.pdf sorts first, so the walk stopped before good.pdf.
    let records = ctx.associated_for("pdf");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "bad.pdf");
}

#[test]
fn test_dispersed_processor_cannot_take_a_member() {
    let env = TestEnv::new();
    env.write_file("a.txt", b"a");

    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker#outer").with_child(
            declaration("process", "nestwalk.structure.DirectoryWalker#inner")
                .with_attribute("pattern", "*.txt"),
        ),
    );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("tree");
    let err = manager.apply_path("tree", &env.tree, &mut ctx).unwrap_err();
    assert_eq!(err.as_processor_error().unwrap().target(), "inner:process");
}

// ============================================================================
// Entry points
// ============================================================================

#[test]
fn test_stream_apply_skips_dispersed_actions() {
    let root = ConfigNode::new("pipeline")
        .with_child(declaration("process", "nestwalk.structure.DirectoryWalker"))
        .with_child(
            declaration("process", "nestwalk.file.Checksum#sums").with_attribute("digests", "md5"),
        );
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("abc.txt");
    manager
        .apply("abc.txt", &mut Cursor::new(b"abc".to_vec()), None, &mut ctx)
        .unwrap();

    let records = ctx.associated_for(CALCULATED_CLAIMANT);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "abc.txt");
    assert_eq!(records[0].properties["md5"], ABC_MD5);
}

#[test]
fn test_stream_apply_without_stream_processor_fails() {
    let root = ConfigNode::new("pipeline")
        .with_child(declaration("process", "nestwalk.structure.DirectoryWalker"));
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("x");
    let err = manager
        .apply("x", &mut Cursor::new(Vec::new()), None, &mut ctx)
        .unwrap_err();
    assert!(err.as_processor_error().is_some());
}

#[test]
fn test_path_apply_without_dispersed_processor_is_unsupported() {
    let env = TestEnv::new();
    let root = ConfigNode::new("pipeline")
        .with_child(declaration("process", "nestwalk.structure.ZipProcessor#zip"));
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("tree");
    let err = manager.apply_path("tree", &env.tree, &mut ctx).unwrap_err();
    let processor_error = err.as_processor_error().unwrap();
    assert_eq!(processor_error.target(), "zip:process");
    assert!(processor_error.message.contains("not currently supported"));
}

#[test]
fn test_missing_root_directory_is_io_error() {
    let root = ConfigNode::new("pipeline")
        .with_child(declaration("process", "nestwalk.structure.DirectoryWalker"));
    let manager = prepared(root, Properties::new());

    let mut ctx = ExecutionContext::new("gone");
    let result = manager.apply_path("gone", Path::new("/definitely/not/here"), &mut ctx);
    assert!(matches!(result, Err(EngineError::Io(_))));
    assert_eq!(ctx.depth(), 0);
}

// ============================================================================
// Compilation
// ============================================================================

#[test]
fn test_mixed_children_become_opaque_configuration() {
    let node = declaration("process", "test.Recorder#mixed")
        .with_child(declaration("process", "nestwalk.file.Checksum"))
        .with_child(ConfigNode::new("note").with_text("free-form"));
    let manager = prepared(ConfigNode::new("pipeline").with_child(node.clone()), Properties::new());

    let actions = manager.actions().unwrap();
    assert_eq!(actions.len(), 1);
    let processor = actions[0].processor();
    assert!(processor.actions().is_empty());
    assert_eq!(processor.configuration(), Some(&node));
}

#[test]
fn test_nested_mode_resolves_attributes_and_text() {
    let node = declaration("process", "test.Recorder#rec")
        .with_attribute("label", "${outer-${inner}}")
        .with_text("  run ${outer-${inner}} ");
    let properties: Properties = [("inner", "X"), ("outer-X", "Y")].into_iter().collect();

    let mut manager = ProcessorManager::new(
        registry(),
        properties.clone(),
        ConfigNode::new("pipeline").with_child(node.clone()),
    )
    .with_options(ManagerOptions {
        resolution: ResolutionMode::Nested,
        ..ManagerOptions::default()
    });
    manager.prepare().unwrap();
    let base = manager.actions().unwrap()[0].processor().base();
    assert_eq!(base.attribute("label"), Some("Y"));
    assert_eq!(base.text.as_deref(), Some("run Y"));

    let plain = prepared(ConfigNode::new("pipeline").with_child(node), properties);
    let base = plain.actions().unwrap()[0].processor().base();
    assert_eq!(base.attribute("label"), Some("${outer-${inner}}"));
}

#[test]
fn test_lineage_lists_enclosing_processors() {
    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker#walk").with_child(
            declaration("process", "nestwalk.structure.ZipProcessor#zip")
                .with_attribute("pattern", "*.zip")
                .with_child(declaration("process", "nestwalk.file.Checksum#sums")),
        ),
    );
    let manager = prepared(root, Properties::new());

    let walker = manager.actions().unwrap()[0].processor();
    assert!(walker.lineage().is_empty());
    let zip = walker.actions()[0].processor();
    let checksum = zip.actions()[0].processor();
    let aliases: Vec<_> = checksum.lineage().iter().map(|p| p.alias.as_str()).collect();
    assert_eq!(aliases, vec!["walk", "zip"]);
    assert!(checksum
        .lineage()
        .contains_implementation("nestwalk.structure.DirectoryWalker"));
}

#[test]
fn test_invalid_selection_pattern_aborts_prepare() {
    let root = ConfigNode::new("pipeline").with_child(
        declaration("process", "nestwalk.structure.DirectoryWalker")
            .with_child(
                declaration("process", "nestwalk.file.Checksum").with_attribute("pattern", "[oops"),
            ),
    );
    let mut manager = ProcessorManager::new(registry(), Properties::new(), root);
    assert!(matches!(manager.prepare(), Err(EngineError::Pattern(_))));
    assert!(!manager.is_prepared());
}

#[test]
fn test_bundled_fixity_pipeline_compiles_and_runs() {
    let env = TestEnv::new();
    env.write_file("docs/paper.pdf", b"%PDF-1.7");
    env.write_file("docs/fake.pdf", b"nope");
    env.write_file("ARCHIVE.ZIP", &build_zip(&[("a.txt", b"abc")]));

    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("pipelines/fixity.toml");
    let pipeline = PipelineConfig::load(&path).unwrap();
    let properties: Properties = [("scratch", env.scratch.display().to_string())]
        .into_iter()
        .collect();
    let manager = prepared(pipeline.pipeline, properties);

    let mut ctx = ExecutionContext::new("tree");
    manager.apply_path("tree", &env.tree, &mut ctx).unwrap();

    assert_eq!(
        calculated_paths(&ctx),
        vec!["ARCHIVE.ZIP", "ARCHIVE.ZIP/a.txt", "docs/fake.pdf", "docs/paper.pdf"]
    );
    let validity: Vec<_> = ctx
        .associated_for("pdf")
        .into_iter()
        .map(|r| (r.path, r.properties["valid"].clone()))
        .collect();
    assert_eq!(
        validity,
        vec![
            ("docs/fake.pdf".to_string(), "false".to_string()),
            ("docs/paper.pdf".to_string(), "true".to_string())
        ]
    );
    assert_eq!(env.scratch_entries(), 0);
}

//! `VMFile.kdl` — a declarative description of the VMs a project wants,
//! read by `vmctl create`/`ssh` to fill in defaults the CLI didn't
//! receive explicitly. Kept intentionally small: one `vm` node per VM,
//! an optional `ssh` child, and a `provision` child listing `shell`/
//! `file` steps, parsed with the `kdl` crate the way the rest of the
//! ambient CLI layer reads structured config.

use std::path::{Path, PathBuf};

use kdl::{KdlDocument, KdlNode};

use crate::error::{Result, VmError};

#[derive(Debug, Clone)]
pub struct ShellProvision {
    pub inline: Option<String>,
    pub script: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileProvision {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone)]
pub enum ProvisionDef {
    Shell(ShellProvision),
    File(FileProvision),
}

#[derive(Debug, Clone)]
pub struct SshDef {
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct VmDef {
    pub name: String,
    pub image: Option<String>,
    pub vcpus: Option<u32>,
    pub memory_mb: Option<u32>,
    pub ssh: Option<SshDef>,
    pub provisions: Vec<ProvisionDef>,
}

#[derive(Debug, Clone, Default)]
pub struct VmFile {
    pub vms: Vec<VmDef>,
}

/// Locate `VMFile.kdl`: an explicit path wins; otherwise look in the
/// current directory.
pub fn discover(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    let candidate = PathBuf::from("VMFile.kdl");
    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(VmError::VmFile("no VMFile.kdl in the current directory".into()))
    }
}

pub fn parse(path: &Path) -> Result<VmFile> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| VmError::VmFile(format!("reading {}: {e}", path.display())))?;
    let doc: KdlDocument = text
        .parse()
        .map_err(|e| VmError::VmFile(format!("parsing {}: {e}", path.display())))?;

    let mut vms = Vec::new();
    for node in doc.nodes() {
        if node.name().value() == "vm" {
            vms.push(parse_vm(node)?);
        }
    }
    Ok(VmFile { vms })
}

fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

fn property(node: &KdlNode, key: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

fn property_int(node: &KdlNode, key: &str) -> Option<u32> {
    node.entries()
        .iter()
        .find(|e| e.name().is_some_and(|n| n.value() == key))
        .and_then(|e| e.value().as_integer())
        .map(|v| v as u32)
}

fn child_value_int(parent: &KdlDocument, key: &str) -> Option<u32> {
    parent.get(key).and_then(|n| {
        n.entries()
            .iter()
            .find(|e| e.name().is_none())
            .and_then(|e| e.value().as_integer())
            .map(|v| v as u32)
    })
}

fn child_value_string(parent: &KdlDocument, key: &str) -> Option<String> {
    parent.get(key).and_then(first_string_arg)
}

fn parse_vm(node: &KdlNode) -> Result<VmDef> {
    let name = first_string_arg(node)
        .ok_or_else(|| VmError::VmFile("vm node missing a name argument".into()))?;

    let Some(children) = node.children() else {
        return Ok(VmDef {
            name,
            image: None,
            vcpus: None,
            memory_mb: None,
            ssh: None,
            provisions: Vec::new(),
        });
    };

    let image = child_value_string(children, "image");
    let vcpus = child_value_int(children, "vcpus");
    let memory_mb = child_value_int(children, "memory");

    let ssh = children.get("ssh").and_then(|n| {
        let sub = n.children()?;
        child_value_string(sub, "user").map(|user| SshDef { user })
    });

    let mut provisions = Vec::new();
    if let Some(prov_node) = children.get("provision") {
        if let Some(steps) = prov_node.children() {
            for step in steps.nodes() {
                match step.name().value() {
                    "shell" => provisions.push(ProvisionDef::Shell(ShellProvision {
                        inline: property(step, "cmd").or_else(|| first_string_arg(step)),
                        script: property(step, "script"),
                    })),
                    "file" => {
                        let source = property(step, "source").ok_or_else(|| {
                            VmError::VmFile("file provision missing source=".into())
                        })?;
                        let destination = property(step, "destination").ok_or_else(|| {
                            VmError::VmFile("file provision missing destination=".into())
                        })?;
                        provisions.push(ProvisionDef::File(FileProvision {
                            source,
                            destination,
                        }));
                    }
                    other => {
                        return Err(VmError::VmFile(format!(
                            "unknown provision step '{other}'"
                        )));
                    }
                }
            }
        }
    }

    Ok(VmDef {
        name,
        image,
        vcpus,
        memory_mb,
        ssh,
        provisions,
    })
}

/// Resolve a path from a VMFile-relative string: absolute paths pass
/// through, relative paths resolve against the VMFile's own directory.
pub fn resolve_path(raw: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(raw);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

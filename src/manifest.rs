//! Jar manifest reading and module classification.
//!
//! A manifest is classified into one of three shapes:
//!
//! - **NetBeans module**: carries `OpenIDE-Module`
//! - **OSGi bundle**: carries `Bundle-SymbolicName` (checked only when there
//!   is no `OpenIDE-Module` header)
//! - **plain jar**: neither; only identification headers are read
//!
//! Dependency headers are parsed only when [`ClassifyOptions::dependencies`]
//! is set, since nothing in cluster assembly needs them.

use anyhow::{Context, Result};
use memmap2::Mmap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::ClusterError;
use crate::split::{osgi_names, split_list};

pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    attributes: Vec<(String, String)>,
}

impl Manifest {
    /// Parses manifest text. Only the main section (up to the first blank
    /// line) is kept; per-entry sections are irrelevant here.
    pub fn parse(text: &str) -> Result<Self, ClusterError> {
        let mut attributes: Vec<(String, String)> = Vec::new();
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

        for (idx, line) in normalized.split('\n').enumerate() {
            let malformed = || ClusterError::MalformedManifest {
                line: idx + 1,
                text: line.to_string(),
            };
            if line.is_empty() {
                if attributes.is_empty() {
                    continue;
                }
                break;
            }

            if let Some(rest) = line.strip_prefix(' ') {
                let (_, value) = attributes.last_mut().ok_or_else(malformed)?;
                value.push_str(rest);
                continue;
            }

            let (name, value) = line.split_once(':').ok_or_else(malformed)?;
            if name.trim().is_empty() {
                return Err(malformed());
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            attributes.push((name.trim().to_string(), value.to_string()));
        }

        Ok(Self { attributes })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Jar(PathBuf),
    File(PathBuf),
    /// Exploded artifact without `META-INF/MANIFEST.MF`.
    Nothing,
}

impl ManifestSource {
    pub fn for_artifact(path: &Path) -> Result<Self> {
        if path.is_file() {
            let is_manifest = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("mf"));
            return Ok(if is_manifest {
                Self::File(path.to_path_buf())
            } else {
                Self::Jar(path.to_path_buf())
            });
        }
        if path.is_dir() {
            let manifest = path.join(MANIFEST_ENTRY);
            return Ok(if manifest.is_file() {
                Self::File(manifest)
            } else {
                Self::Nothing
            });
        }
        Err(ClusterError::NotAnArtifact {
            path: path.to_path_buf(),
        }
        .into())
    }

    pub fn read(&self) -> Result<Option<Manifest>> {
        match self {
            Self::Jar(path) => read_jar_manifest(path),
            Self::File(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
                let manifest = Manifest::parse(&String::from_utf8_lossy(&bytes)).map_err(|e| {
                    ClusterError::UnreadableArtifact {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(manifest))
            }
            Self::Nothing => Ok(None),
        }
    }
}

fn read_jar_manifest(jar_path: &Path) -> Result<Option<Manifest>> {
    let unreadable = |reason: String| ClusterError::UnreadableArtifact {
        path: jar_path.to_path_buf(),
        reason,
    };

    let file = File::open(jar_path).map_err(|e| unreadable(e.to_string()))?;
    // SAFETY: The file is opened read-only and outlives the mapping.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| unreadable(e.to_string()))?;
    let mut archive =
        ZipArchive::new(Cursor::new(&mmap[..])).map_err(|e| unreadable(e.to_string()))?;

    let exact = archive.by_name(MANIFEST_ENTRY).map(|_| ());
    let entry_name = match exact {
        Ok(()) => MANIFEST_ENTRY.to_string(),
        Err(ZipError::FileNotFound) => {
            match archive
                .file_names()
                .find(|n| n.eq_ignore_ascii_case(MANIFEST_ENTRY))
            {
                Some(name) => name.to_string(),
                None => return Ok(None),
            }
        }
        Err(e) => return Err(unreadable(e.to_string()).into()),
    };

    let mut entry = archive
        .by_name(&entry_name)
        .map_err(|e| unreadable(e.to_string()))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| unreadable(e.to_string()))?;
    let manifest = Manifest::parse(&String::from_utf8_lossy(&bytes))
        .map_err(|e| unreadable(e.to_string()))?;
    Ok(Some(manifest))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub dependencies: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    NetBeansModule,
    OsgiBundle,
    PlainJar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetBeansModule {
    pub module_with_release: String,
    pub localizing_bundle: Option<String>,
    pub spec_version: Option<String>,
    pub impl_version: Option<String>,
    pub enabled: Option<bool>,
    pub classpath: String,
    pub packages: Vec<String>,
    pub public_packages: bool,
    /// Set whenever a friends header accompanies public packages, even an
    /// empty one.
    pub friend_packages: bool,
    pub friends: Vec<String>,
    pub dependency_tokens: Vec<String>,
    pub requires_tokens: Vec<String>,
    pub provides_tokens: Vec<String>,
}

impl NetBeansModule {
    pub fn is_localized(&self) -> bool {
        self.localizing_bundle.is_some()
    }

    pub fn has_public_packages(&self) -> bool {
        self.public_packages
    }

    pub fn has_friend_packages(&self) -> bool {
        self.friend_packages
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsgiBundle {
    pub module_with_release: String,
    pub spec_version: Option<String>,
    pub autoload: bool,
    pub start_level: Option<i32>,
    pub enabled: Option<bool>,
    pub exports_packages: bool,
    pub dependency_tokens: Vec<String>,
    pub imports: BTreeSet<String>,
    pub exports: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlainJar {
    pub name: Option<String>,
    pub spec_version: Option<String>,
    pub impl_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleDescriptor {
    #[serde(rename = "netbeans_module")]
    NetBeans(NetBeansModule),
    #[serde(rename = "osgi_bundle")]
    Osgi(OsgiBundle),
    #[serde(rename = "plain_jar")]
    Plain(PlainJar),
}

impl ModuleDescriptor {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::NetBeans(_) => ModuleKind::NetBeansModule,
            Self::Osgi(_) => ModuleKind::OsgiBundle,
            Self::Plain(_) => ModuleKind::PlainJar,
        }
    }

    pub fn is_cluster_module(&self) -> bool {
        !matches!(self, Self::Plain(_))
    }

    pub fn module_with_release(&self) -> Option<&str> {
        match self {
            Self::NetBeans(m) => Some(&m.module_with_release),
            Self::Osgi(b) => Some(&b.module_with_release),
            Self::Plain(p) => p.name.as_deref(),
        }
    }

    pub fn module_id(&self) -> Option<&str> {
        self.module_with_release().map(strip_release)
    }

    pub fn dashed_id(&self) -> Option<String> {
        self.module_id().map(dashed)
    }

    pub fn spec_version(&self) -> Option<&str> {
        match self {
            Self::NetBeans(m) => m.spec_version.as_deref(),
            Self::Osgi(b) => b.spec_version.as_deref(),
            Self::Plain(p) => p.spec_version.as_deref(),
        }
    }

    pub fn impl_version(&self) -> Option<&str> {
        match self {
            Self::NetBeans(m) => m.impl_version.as_deref(),
            Self::Osgi(_) => None,
            Self::Plain(p) => p.impl_version.as_deref(),
        }
    }

    pub fn autoload(&self) -> bool {
        match self {
            Self::Osgi(b) => b.autoload,
            _ => true,
        }
    }

    pub fn has_public_packages(&self) -> bool {
        match self {
            Self::NetBeans(m) => m.has_public_packages(),
            Self::Osgi(b) => b.exports_packages,
            Self::Plain(_) => false,
        }
    }

    pub fn dependency_tokens(&self) -> &[String] {
        match self {
            Self::NetBeans(m) => &m.dependency_tokens,
            Self::Osgi(b) => &b.dependency_tokens,
            Self::Plain(_) => &[],
        }
    }
}

pub fn dashed(module_id: &str) -> String {
    module_id.replace('.', "-")
}

pub fn strip_release(name: &str) -> &str {
    match name.rfind('/') {
        Some(idx)
            if idx + 1 < name.len() && name[idx + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            &name[..idx]
        }
        _ => name,
    }
}

pub fn examine(path: &Path, options: ClassifyOptions) -> Result<ModuleDescriptor> {
    let source = ManifestSource::for_artifact(path)?;
    let Some(manifest) = source.read()? else {
        tracing::debug!(artifact = %path.display(), "no manifest entries to examine");
        return Ok(ModuleDescriptor::Plain(PlainJar::default()));
    };
    classify(&manifest, path, options)
}

/// Classifies an already parsed manifest. `origin` is only used in errors.
pub fn classify(
    manifest: &Manifest,
    origin: &Path,
    options: ClassifyOptions,
) -> Result<ModuleDescriptor> {
    if let Some(name) = manifest.get("OpenIDE-Module") {
        return Ok(ModuleDescriptor::NetBeans(netbeans_module(
            manifest, name, options,
        )));
    }
    if let Some(symbolic_name) = manifest.get("Bundle-SymbolicName") {
        return osgi_bundle(manifest, symbolic_name, origin, options).map(ModuleDescriptor::Osgi);
    }

    Ok(ModuleDescriptor::Plain(PlainJar {
        name: manifest
            .get("Package")
            .or_else(|| manifest.get("Extension-Name"))
            .map(str::to_string),
        spec_version: manifest.get("Specification-Version").map(str::to_string),
        impl_version: manifest.get("Implementation-Version").map(str::to_string),
    }))
}

fn netbeans_module(manifest: &Manifest, name: &str, options: ClassifyOptions) -> NetBeansModule {
    let owned = |key: &str| manifest.get(key).map(str::to_string);

    let mut packages = Vec::new();
    let mut public_packages = false;
    let mut friend_packages = false;
    let mut friends = Vec::new();
    if let Some(value) = manifest
        .get("OpenIDE-Module-Public-Packages")
        .filter(|v| v.trim() != "-")
    {
        match manifest.get("OpenIDE-Module-Friends") {
            Some(list) => {
                friend_packages = true;
                friends = split_list(list);
            }
            None => public_packages = true,
        }
        packages = split_list(value);
    }

    let mut module = NetBeansModule {
        module_with_release: name.to_string(),
        localizing_bundle: owned("OpenIDE-Module-Localizing-Bundle"),
        spec_version: owned("OpenIDE-Module-Specification-Version"),
        impl_version: owned("OpenIDE-Module-Implementation-Version"),
        enabled: manifest.get("OpenIDE-Module-Enabled").map(parse_bool),
        classpath: owned("Class-Path").unwrap_or_default(),
        packages,
        public_packages,
        friend_packages,
        friends,
        dependency_tokens: Vec::new(),
        requires_tokens: Vec::new(),
        provides_tokens: Vec::new(),
    };

    if options.dependencies {
        if let Some(deps) = manifest.get("OpenIDE-Module-Module-Dependencies") {
            module.dependency_tokens = deps
                .split(',')
                .filter(|t| !t.is_empty())
                .map(module_dependency_name)
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(provides) = manifest.get("OpenIDE-Module-Provides") {
            module.provides_tokens = split_list(provides);
        }
        for key in ["OpenIDE-Module-Requires", "OpenIDE-Module-Needs"] {
            if let Some(value) = manifest.get(key) {
                module.requires_tokens.extend(split_list(value));
            }
        }
    }

    module
}

/// `org.bar/1 > 1.2` and `org.bar = 201` both become `org.bar`.
fn module_dependency_name(token: &str) -> String {
    let mut tok = token;
    match (tok.find('>'), tok.find('=')) {
        (Some(spec), _) if spec > 0 => tok = &tok[..spec],
        (_, Some(imp)) if imp > 0 => tok = &tok[..imp],
        _ => {}
    }
    if let Some(slash) = tok.find('/')
        && slash > 0
    {
        tok = &tok[..slash];
    }
    tok.trim().to_string()
}

fn osgi_bundle(
    manifest: &Manifest,
    symbolic_name: &str,
    origin: &Path,
    options: ClassifyOptions,
) -> Result<OsgiBundle> {
    let start_level = match manifest.get("OpenIDE-Module-StartLevel") {
        Some(raw) => Some(raw.trim().parse::<i32>().map_err(|_| {
            ClusterError::InvalidStartLevel {
                path: origin.to_path_buf(),
                value: raw.to_string(),
            }
        })?),
        None => None,
    };

    let mut bundle = OsgiBundle {
        module_with_release: bundle_module_name(symbolic_name),
        spec_version: manifest.get("Bundle-Version").map(str::to_string),
        autoload: manifest
            .get("Nbm-Maven-Plugin-Autoload")
            .map(parse_bool)
            .unwrap_or(true),
        start_level,
        enabled: manifest.get("OpenIDE-Module-Enabled").map(parse_bool),
        exports_packages: manifest.get("Export-Package").is_some(),
        dependency_tokens: Vec::new(),
        imports: BTreeSet::new(),
        exports: BTreeSet::new(),
    };

    if options.dependencies {
        if let Some(deps) = manifest.get("Require-Bundle") {
            bundle.dependency_tokens = osgi_names(deps).collect();
        }
        if let Some(imports) = manifest.get("Import-Package") {
            bundle.imports = osgi_names(imports).collect();
        }
        if let Some(exports) = manifest.get("Export-Package") {
            bundle.exports = osgi_names(exports).collect();
        }
    }

    Ok(bundle)
}

/// `com.foo-bar;singleton:=true` becomes `com_foo_bar`.
pub fn bundle_module_name(symbolic_name: &str) -> String {
    let base = match symbolic_name.find(';') {
        Some(idx) if idx + 1 < symbolic_name.len() => symbolic_name[..idx].trim_end_matches(' '),
        _ => symbolic_name,
    };
    base.replace(['-', '.'], "_")
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

//! Library dependency resolution.
//!
//! Starting from the includes of the sketch, every header is mapped to a
//! library found in the search roots, and the libraries' own includes and
//! declared dependencies are followed breadth-first until nothing new turns
//! up.
//!
//! # Priority
//!
//! Roots are searched in a fixed order: sketch-local, global user, referenced
//! core, platform bundled. The first root with a library exporting the header
//! wins. Within a root, a library whose name matches the header exactly beats
//! a partial match, and remaining ties go to the lexically smallest name.
//! Among versions of one library the pinned version wins, then the highest
//! version satisfying a declared constraint, then the highest version.

pub mod graph;
pub mod scan;

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::CatalogError;
use crate::catalog::library::{DependencyConstraint, LibraryCandidate, Precompiled, is_header, scan_library_root};
use crate::sketch::Sketch;
use graph::{DependencyGraph, SKETCH_NODE};

#[derive(Debug, Error)]
pub enum LibraryError {
  #[error(transparent)]
  Catalog(#[from] CatalogError),

  #[error("library dependency cycle: {}", .cycle.join(" -> "))]
  Cycle { cycle: Vec<String> },
}

/// Which search root a library came from, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
  SketchLocal,
  GlobalUser,
  ReferencedCore,
  PlatformBundled,
}

/// A folder of libraries tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoot {
  pub path: PathBuf,
  pub provenance: Provenance,
}

impl SearchRoot {
  pub fn new(path: impl Into<PathBuf>, provenance: Provenance) -> Self {
    Self {
      path: path.into(),
      provenance,
    }
  }
}

/// A library selected into the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLibrary {
  #[serde(flatten)]
  pub library: LibraryCandidate,
  pub provenance: Provenance,
}

/// An include no installed library provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedInclude {
  pub header: String,
  /// Graph nodes whose sources include the header.
  pub included_by: Vec<String>,
}

/// The outcome of resolution: the graph plus anything left unresolved.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LibraryResolution {
  pub graph: DependencyGraph,
  pub unresolved: Vec<UnresolvedInclude>,
}

/// All libraries of all search roots, loaded once.
#[derive(Debug, Clone, Default)]
pub struct LibraryIndex {
  roots: Vec<(SearchRoot, BTreeMap<String, Vec<LibraryCandidate>>)>,
}

impl LibraryIndex {
  /// Load every root in priority order. Missing roots are empty.
  pub fn load(roots: &[SearchRoot]) -> Result<Self, LibraryError> {
    let mut loaded = Vec::with_capacity(roots.len());
    for root in roots {
      let libraries = scan_library_root(&root.path)?;
      debug!(
        root = %root.path.display(),
        provenance = ?root.provenance,
        libraries = libraries.len(),
        "indexed library root"
      );
      loaded.push((root.clone(), libraries));
    }
    Ok(Self { roots: loaded })
  }
}

/// Settings that shape candidate selection.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
  /// Board architecture for the `architectures=` filter.
  pub architecture: String,
  /// Exact versions requested by the build profile.
  pub pins: BTreeMap<String, Version>,
  /// Folders whose headers never need a library (core, variant).
  pub builtin_include_dirs: Vec<PathBuf>,
}

/// Closeness of a library name to a header: exact, partial, or none.
fn name_rank(name: &str, header: &str) -> u8 {
  let stem = Path::new(header)
    .file_stem()
    .map(|s| s.to_string_lossy().to_lowercase())
    .unwrap_or_default();
  let name = name.to_lowercase();
  if name == stem {
    0
  } else if name.starts_with(&stem) || stem.starts_with(&name) || name.contains(&stem) {
    1
  } else {
    2
  }
}

/// Highest version; the first of equal versions wins.
fn highest<'a>(items: impl Iterator<Item = &'a LibraryCandidate>) -> Option<&'a LibraryCandidate> {
  items.fold(None, |best, lib| match best {
    Some(b) if b.version >= lib.version => Some(b),
    _ => Some(lib),
  })
}

fn select_version<'a>(
  name: &str,
  versions: &'a [LibraryCandidate],
  options: &ResolveOptions,
  requirement: Option<&semver::VersionReq>,
) -> Option<&'a LibraryCandidate> {
  let compatible: Vec<&LibraryCandidate> = versions
    .iter()
    .filter(|l| l.supports_architecture(&options.architecture))
    .collect();

  if let Some(pin) = options.pins.get(name) {
    if let Some(lib) = compatible.iter().copied().find(|l| l.version.as_ref() == Some(pin)) {
      return Some(lib);
    }
    warn!(library = name, pin = %pin, "pinned library version not installed, using highest");
  }
  if let Some(req) = requirement {
    let matching = compatible
      .iter()
      .copied()
      .filter(|l| l.version.as_ref().is_some_and(|v| req.matches(v)));
    if let Some(lib) = highest(matching) {
      return Some(lib);
    }
  }
  highest(compatible.into_iter())
}

enum Request {
  Header { header: String, includer_dir: Option<PathBuf> },
  Name(DependencyConstraint),
}

/// Breadth-first resolver over a [`LibraryIndex`].
pub struct LibraryResolver<'a> {
  index: &'a LibraryIndex,
  options: &'a ResolveOptions,
}

impl<'a> LibraryResolver<'a> {
  pub fn new(index: &'a LibraryIndex, options: &'a ResolveOptions) -> Self {
    Self { index, options }
  }

  /// The library providing `header`, searching roots in priority order.
  pub fn find_for_header(&self, header: &str) -> Option<ResolvedLibrary> {
    for (root, libraries) in &self.index.roots {
      let best = libraries
        .iter()
        .filter_map(|(name, versions)| select_version(name, versions, self.options, None))
        .filter(|lib| lib.exports_header(header))
        .min_by(|a, b| {
          name_rank(&a.name, header)
            .cmp(&name_rank(&b.name, header))
            .then_with(|| a.name.cmp(&b.name))
        });
      if let Some(lib) = best {
        return Some(ResolvedLibrary {
          library: lib.clone(),
          provenance: root.provenance,
        });
      }
    }
    None
  }

  /// The library called `name`, searching roots in priority order.
  pub fn find_by_name(&self, constraint: &DependencyConstraint) -> Option<ResolvedLibrary> {
    self.index.roots.iter().find_map(|(root, libraries)| {
      let versions = libraries.get(&constraint.name)?;
      let lib = select_version(&constraint.name, versions, self.options, constraint.requirement.as_ref())?;
      Some(ResolvedLibrary {
        library: lib.clone(),
        provenance: root.provenance,
      })
    })
  }

  fn is_builtin(&self, header: &str, includer_dir: Option<&Path>) -> bool {
    self
      .options
      .builtin_include_dirs
      .iter()
      .map(PathBuf::as_path)
      .chain(includer_dir)
      .any(|dir| dir.join(header).is_file())
  }

  /// Requests for everything `lib` needs.
  fn library_requests(&self, lib: &LibraryCandidate) -> Vec<Request> {
    let mut requests = Vec::new();
    if lib.precompiled == Precompiled::Full && lib.declares_no_dependencies {
      debug!(library = %lib.name, "precompiled library declares no dependencies");
      return requests;
    }
    if lib.precompiled == Precompiled::Full {
      debug!(library = %lib.name, "scanning precompiled library headers for dependencies");
    }
    let files = scan::library_files(lib)
      .into_iter()
      .filter(|f| scan::is_source(f) || is_header(f));
    for file in files {
      let includer_dir = file.parent().map(Path::to_path_buf);
      for header in scan::scan_file(&file) {
        requests.push(Request::Header {
          header,
          includer_dir: includer_dir.clone(),
        });
      }
    }
    requests.extend(lib.declared_dependencies.iter().cloned().map(Request::Name));
    requests
  }

  /// Resolve the closure of `sketch`'s includes.
  ///
  /// Unresolved headers are collected, not fatal. A dependency cycle among
  /// libraries is an error.
  pub fn resolve(&self, sketch: &Sketch) -> Result<LibraryResolution, LibraryError> {
    let mut graph = DependencyGraph::new();
    let mut unresolved: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut header_owner: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut queue: VecDeque<(String, Request)> = VecDeque::new();

    for file in sketch.scan_files() {
      let includer_dir = file.parent().map(Path::to_path_buf);
      for header in scan::scan_file(&file) {
        if sketch.provides_header(&header) {
          continue;
        }
        queue.push_back((
          SKETCH_NODE.to_string(),
          Request::Header {
            header,
            includer_dir: includer_dir.clone(),
          },
        ));
      }
    }

    while let Some((from, request)) = queue.pop_front() {
      let found = match request {
        Request::Header { header, includer_dir } => {
          if self.is_builtin(&header, includer_dir.as_deref()) {
            continue;
          }
          let owner = header_owner
            .entry(header.clone())
            .or_insert_with(|| self.find_for_header(&header).map(|lib| lib.library.name.clone()))
            .clone();
          match owner {
            Some(name) if graph.library(&name).is_some() => {
              graph.add_edge(&from, &name);
              continue;
            }
            Some(_) => self.find_for_header(&header),
            None => {
              let includers = unresolved.entry(header).or_default();
              if !includers.contains(&from) {
                includers.push(from);
              }
              continue;
            }
          }
        }
        Request::Name(constraint) => {
          if graph.library(&constraint.name).is_some() {
            graph.add_edge(&from, &constraint.name);
            continue;
          }
          let found = self.find_by_name(&constraint);
          if found.is_none() {
            warn!(library = %from, dependency = %constraint.name, "declared dependency is not installed");
          }
          found
        }
      };

      let Some(resolved) = found else { continue };
      let name = resolved.library.name.clone();
      if graph.library(&name).is_none() {
        debug!(
          library = %name,
          version = ?resolved.library.version,
          provenance = ?resolved.provenance,
          dir = %resolved.library.root_path.display(),
          "resolved library"
        );
        let requests = self.library_requests(&resolved.library);
        graph.add_library(resolved);
        queue.extend(requests.into_iter().map(|r| (name.clone(), r)));
      }
      graph.add_edge(&from, &name);
    }

    if let Some(cycle) = graph.find_cycles().into_iter().next() {
      return Err(LibraryError::Cycle { cycle });
    }

    let unresolved: Vec<UnresolvedInclude> = unresolved
      .into_iter()
      .map(|(header, included_by)| UnresolvedInclude { header, included_by })
      .collect();
    for missing in &unresolved {
      warn!(header = %missing.header, included_by = ?missing.included_by, "no library provides header");
    }
    info!(
      libraries = graph.len().saturating_sub(1),
      unresolved = unresolved.len(),
      "resolved library dependencies"
    );

    Ok(LibraryResolution { graph, unresolved })
  }
}

/// Load the roots and resolve `sketch` in one call.
pub fn resolve_libraries(
  sketch: &Sketch,
  roots: &[SearchRoot],
  options: &ResolveOptions,
) -> Result<LibraryResolution, LibraryError> {
  let index = LibraryIndex::load(roots)?;
  LibraryResolver::new(&index, options).resolve(sketch)
}

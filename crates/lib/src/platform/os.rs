use std::fmt;

/// Host operating systems known to platform definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
  FreeBsd,
}

impl Os {
  /// Key suffixes that select an OS-specific property value.
  pub const PROPERTY_SUFFIXES: [&'static str; 4] = ["linux", "macosx", "windows", "freebsd"];

  /// Detect the running operating system.
  ///
  /// Unix systems without a dedicated variant are treated as Linux, which is
  /// what platform files target for generic Unix hosts.
  pub fn current() -> Self {
    match std::env::consts::OS {
      "macos" => Self::MacOs,
      "windows" => Self::Windows,
      "freebsd" => Self::FreeBsd,
      _ => Self::Linux,
    }
  }

  /// The suffix used by property files (`tools.avrdude.cmd.path.linux`).
  pub fn property_suffix(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "macosx",
      Self::Windows => "windows",
      Self::FreeBsd => "freebsd",
    }
  }

  /// The value published as `runtime.os`.
  pub fn as_str(&self) -> &'static str {
    self.property_suffix()
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

//! Download locations on the libretro nightly build server

/// Operating system families the build server publishes cores for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    Windows,
    MacOs,
    Android,
}

/// Where the build server keeps cores for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildbotTarget {
    pub os: TargetOs,
    /// Platform subdirectory, with a trailing slash
    pub platform: &'static str,
    /// Architecture subdirectory, with a trailing slash
    pub arch: &'static str,
    /// Extension of core libraries (`so`, `dll`, `dylib`)
    pub lib_ext: &'static str,
}

impl BuildbotTarget {
    /// The target matching this build of the host.
    pub fn host() -> Self {
        let arch = std::env::consts::ARCH;
        if cfg!(target_os = "android") {
            Self {
                os: TargetOs::Android,
                platform: "android/",
                arch: match arch {
                    "x86_64" => "x86_64/",
                    "x86" => "x86/",
                    "aarch64" => "arm64-v8a/",
                    _ => "armeabi-v7a/",
                },
                lib_ext: "so",
            }
        } else if cfg!(windows) {
            Self {
                os: TargetOs::Windows,
                platform: "windows-msvc2010/",
                arch: if arch == "x86" { "x86/" } else { "x86_64/" },
                lib_ext: "dll",
            }
        } else if cfg!(target_os = "macos") {
            Self {
                os: TargetOs::MacOs,
                platform: "apple/osx/",
                arch: match arch {
                    "x86" => "x86/",
                    "aarch64" => "arm64/",
                    _ => "x86_64/",
                },
                lib_ext: "dylib",
            }
        } else {
            Self {
                os: TargetOs::Linux,
                platform: "linux/",
                arch: match arch {
                    "x86" => "x86/",
                    "arm" | "aarch64" => "armv7-neon-hf/",
                    _ => "x86_64/",
                },
                lib_ext: "so",
            }
        }
    }

    /// Name the build server publishes core `name` under.
    fn published_name<'a>(&self, name: &'a str) -> &'a str {
        match (self.os, name) {
            (TargetOs::Windows, "snes9x") => "snes9x2010",
            _ => name,
        }
    }

    /// Name a sync asks for, given the name a loaded core reports.
    pub fn wanted_name<'a>(&self, core_name: &'a str) -> &'a str {
        match (self.os, core_name) {
            (TargetOs::Windows, "snes9x 2010") => "snes9x",
            _ => core_name,
        }
    }

    /// Zip archive URL of core `name` under the build server root `base`.
    pub fn core_url(&self, base: &str, name: &str) -> String {
        let name = self.published_name(name);
        match self.os {
            // The Android tree puts the arch inside the date directory
            TargetOs::Android => format!(
                "{base}{}latest/{}{name}_libretro_android.{}.zip",
                self.platform, self.arch, self.lib_ext
            ),
            _ => format!(
                "{base}{}{}latest/{name}_libretro.{}.zip",
                self.platform, self.arch, self.lib_ext
            ),
        }
    }

    /// True if `file_name` looks like a core library for this target.
    pub fn is_library(&self, file_name: &str) -> bool {
        file_name
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext == self.lib_ext)
    }
}

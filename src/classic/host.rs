use crate::process::Cmd;
use anyhow::{Context, Result};
use std::fs;

/// Debian name of the host architecture.
///
/// Asks dpkg first; hosts without it fall back to the Rust target name.
pub fn get_host_arch() -> String {
    if let Ok(output) = Cmd::new("dpkg")
        .arg("--print-architecture")
        .allow_fail()
        .run()
    {
        let arch = output.stdout_str().trim().to_string();
        if output.success() && !arch.is_empty() {
            return arch;
        }
    }
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "arm" => "armhf",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64el",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    };
    arch.to_string()
}

/// Release codename of the host, from os-release.
pub fn get_host_suite() -> Result<String> {
    let content = fs::read_to_string("/etc/os-release")
        .or_else(|_| fs::read_to_string("/usr/lib/os-release"))
        .context("Error reading os-release")?;
    parse_version_codename(&content).context("os-release has no VERSION_CODENAME")
}

pub fn parse_version_codename(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let value = line.strip_prefix("VERSION_CODENAME=")?;
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// qemu user-mode emulator needed to run `arch` binaries in a chroot.
pub fn get_qemu_static_for_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "armhf" => Some("qemu-arm-static"),
        "arm64" => Some("qemu-aarch64-static"),
        "ppc64el" => Some("qemu-ppc64le-static"),
        _ => None,
    }
}

//! Extension assembly probing.

use crate::{BoundaryFailure, ErrorKind, Result, Status};
use pelite::image::IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR;
use std::path::{Path, PathBuf};

/// Bitness of a PE image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageBitness {
    Pe32,
    Pe64,
}

/// What the bridge knows about the extension assembly before handing it to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyProbe {
    /// Path handed to the runtime's load-from-path operation.
    pub path: PathBuf,
    /// Short assembly name (file stem), used for the load-by-name lookup.
    pub name: String,
    /// `None` until the image has been inspected.
    pub bitness: Option<ImageBitness>,
    /// The image carries a CLR header.
    pub managed: bool,
}

/// Check that the assembly exists and derive its short name.
pub fn locate(path: &Path) -> Result<AssemblyProbe> {
    if !path.is_file() {
        return Err(ErrorKind::AssemblyNotFound.wrap(
            BoundaryFailure::new(Status::COR_E_FILENOTFOUND, format!("locate {}", path.display()))
                .with_description("extension assembly does not exist"),
        ));
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(AssemblyProbe {
        path: path.to_path_buf(),
        name,
        bitness: None,
        managed: false,
    })
}

/// Locate the assembly and verify it is a PE image with a CLR header.
pub fn probe_assembly(path: &Path) -> Result<AssemblyProbe> {
    let mut probe = locate(path)?;
    let bytes = std::fs::read(path)?;

    let (bitness, managed) = inspect_image(&bytes).map_err(|reason| {
        ErrorKind::Load.wrap(
            BoundaryFailure::new(Status::COR_E_BADIMAGEFORMAT, format!("inspect {}", path.display()))
                .with_description(reason),
        )
    })?;

    if !managed {
        return Err(ErrorKind::Load.wrap(
            BoundaryFailure::new(Status::COR_E_BADIMAGEFORMAT, format!("inspect {}", path.display()))
                .with_description("image has no CLR header"),
        ));
    }

    probe.bitness = Some(bitness);
    probe.managed = true;
    Ok(probe)
}

/// Parse a PE image and report its bitness and whether it has a CLR header.
fn inspect_image(bytes: &[u8]) -> std::result::Result<(ImageBitness, bool), String> {
    use pelite::pe32::{Pe as Pe32, PeFile as PeFile32};
    use pelite::pe64::{Pe, PeFile};

    // Try 64-bit PE first, then 32-bit
    match PeFile::from_bytes(bytes) {
        Ok(pe) => {
            let managed = pe
                .optional_header()
                .DataDirectory
                .get(IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR)
                .is_some_and(|dir| dir.VirtualAddress != 0 && dir.Size != 0);
            Ok((ImageBitness::Pe64, managed))
        }
        Err(_) => {
            let pe = PeFile32::from_bytes(bytes).map_err(|e| e.to_string())?;
            let managed = pe
                .optional_header()
                .DataDirectory
                .get(IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR)
                .is_some_and(|dir| dir.VirtualAddress != 0 && dir.Size != 0);
            Ok((ImageBitness::Pe32, managed))
        }
    }
}

/// Case-insensitive match of a display name (`Name, Version=..., Culture=...`)
/// against a short assembly name.
pub fn full_name_matches(full_name: &str, short_name: &str) -> bool {
    let full = full_name.trim();
    if full.len() < short_name.len() || !full.is_char_boundary(short_name.len()) {
        return false;
    }
    let (head, rest) = full.split_at(short_name.len());
    head.eq_ignore_ascii_case(short_name) && (rest.is_empty() || rest.starts_with(','))
}

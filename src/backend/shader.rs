// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. build.rs compiles the GLSL sources; the
// binaries are read at startup from the paths in config.toml.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Decode SPIR-V bytes into words, checking size and magic number
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V binary")
}

/// Read a SPIR-V file and create a shader module from it.
///
/// The caller destroys the module once the pipeline using it exists.
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open shader file {:?}", path))?;
    let code = parse_spirv(&bytes).with_context(|| format!("Failed to load {:?}", path))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .with_context(|| format!("Failed to create shader module from {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spirv_words() {
        let mut bytes = Vec::new();
        for word in [0x0723_0203u32, 0x0001_0000, 42] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }

        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000, 42]);
    }

    #[test]
    fn test_parse_spirv_rejects_truncated_input() {
        assert!(parse_spirv(&[0x03, 0x02, 0x23]).is_err());
    }
}

// Shader module loading
//
// Shaders ship as precompiled SPIR-V next to the binary. They are read at
// startup, wrapped in shader modules for pipeline creation, and destroyed
// right after the pipeline exists.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Read a SPIR-V binary from disk
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open shader file: {}", path.display()))?;

    decode_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {}", path.display()))
}

/// Turn raw bytes into SPIR-V words, checking length and magic number
pub fn decode_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    // read_spv handles alignment and byte order, and rejects partial words
    let words = ash::util::read_spv(&mut Cursor::new(bytes))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => anyhow::bail!("bad magic number {:#010x}", other),
        None => anyhow::bail!("empty shader binary"),
    }
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn valid_header_decodes() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn byte_swapped_binary_is_normalized() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn partial_word_is_rejected() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 1]);
        bytes.pop();
        assert!(decode_spirv(&bytes).is_err());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = words_to_bytes(&[0xdead_beef, 1]);
        let err = decode_spirv(&bytes).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn empty_binary_is_rejected() {
        assert!(decode_spirv(&[]).is_err());
    }

    #[test]
    fn shipped_binaries_are_valid_spirv() {
        let shaders = crate::config::ShaderConfig::default();
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));

        for path in [&shaders.vertex, &shaders.fragment] {
            let words = read_spirv(&root.join(path)).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC);
            // version word, generator, id bound, schema
            assert!(words.len() > 5);
            assert!(words[3] > 0, "{} declares no ids", path.display());
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_spirv(Path::new("assets/shaders/bytecodes/nope.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("nope.spv"));
    }
}

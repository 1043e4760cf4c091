pub mod host_validator;
pub mod ssh_wire;

pub use host_validator::{known_host_name, validate_hostname};
pub use ssh_wire::{
    blob_algorithm, decode_signature, encode_signature, fingerprint_sha256, read_string, read_u32,
    write_string, write_u32,
};

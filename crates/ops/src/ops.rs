//! Operation Handlers (C10): the public mutating-operation surface,
//! §4.12's per-family contracts built on top of the Authorization Gate
//! (`storaged-auth`) and Job Engine (`storaged-jobs`).

mod busy;
mod drive;
mod error;
mod filesystem;
mod luks;
mod lvm2;
mod md;
mod options;
mod partition;
mod smart;

pub use busy::{extended_partition_has_logical_partitions, is_busy};
pub use drive::{benchmark, detach, eject, encode_standby_timeout, inhibit_all_polling, poll_media, set_spindown_timeout};
pub use error::{map_known_exit_code, OpError};
pub use filesystem::{check, compose_mount_point, create as filesystem_create, list_open_files, mount, read_supported_filesystems, unmount, CheckResult, OpContext};
pub use luks::{change_passphrase, cleartext_dm_name, lock as luks_lock, parse_cleartext_uid, unlock as luks_unlock};
pub use lvm2::{lv_create, lv_create_with_filesystem, lv_remove, resolve_vg_name, vg_add_pv, vg_remove_pv, vg_set_name, vg_start, vg_stop};
pub use md::{add_spare as md_add_spare, check as md_check, create as md_create, expand as md_expand, first_free_md_minor, remove_component as md_remove_component, repair as md_repair, start as md_start, stop as md_stop, MdCheckResult};
pub use options::{default_options, validate_options};
pub use partition::{create as partition_create, create_table as partition_table_create, delete as partition_delete, wait_for};
pub use smart::{refresh as smart_refresh, selftest as smart_selftest, SmartResult};

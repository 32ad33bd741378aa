//
// Copyright (c) The Parley Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bgp;
pub mod bytes;
pub mod ip;
pub mod mac_addr;
pub mod socket;
pub mod task;

use tokio::sync::mpsc;

// Useful type definition(s).
pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;
pub type UnboundedSender<T> = mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = mpsc::UnboundedReceiver<T>;

/// Compares two byte slices, printing both in hexadecimal on mismatch.
#[macro_export]
macro_rules! assert_eq_hex {
    ($left:expr, $right:expr) => {
        let left: &[u8] = &$left;
        let right: &[u8] = &$right;
        if left != right {
            panic!(
                "assertion failed\n  left: {}\n right: {}",
                left.iter()
                    .map(|byte| format!("{:02x}", byte))
                    .collect::<String>(),
                right
                    .iter()
                    .map(|byte| format!("{:02x}", byte))
                    .collect::<String>(),
            );
        }
    };
}

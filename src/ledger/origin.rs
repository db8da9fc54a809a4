// Per-channel commitment state machine for a bidirectional off-chain
// payment protocol.
//
// Written in 2024 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Which side of the channel proposed a given ledger change.

/// The two ends of a channel, from the point of view of this node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display)]
pub enum Origin {
    #[display("local")]
    Local,
    #[display("remote")]
    Remote,
}

impl Origin {
    pub fn other(self) -> Origin {
        match self {
            Origin::Local => Origin::Remote,
            Origin::Remote => Origin::Local,
        }
    }
}

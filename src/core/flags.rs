use bitflags::bitflags;

bitflags! {
    /// Routing flags carried in the 4-byte flags field of every frame
    ///
    /// - bit 0: SERVER_TO_CLIENT - frame travels from a backend towards a client
    /// - bit 1: BROADCAST - fan out to every session instead of one balanced pick
    /// - bit 2: REDIRECT - the prefix token names the exact target session
    /// - bits 3-31: reserved, preserved untouched by relays
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        const SERVER_TO_CLIENT = 0b0000_0001;
        const BROADCAST = 0b0000_0010;
        const REDIRECT = 0b0000_0100;
    }
}

/// Direction of travel encoded in [`PacketFlags::SERVER_TO_CLIENT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl PacketFlags {
    /// Reconstruct flags from the wire, keeping reserved bits intact
    pub fn from_wire(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }

    pub fn direction(self) -> Direction {
        if self.contains(Self::SERVER_TO_CLIENT) {
            Direction::ServerToClient
        } else {
            Direction::ClientToServer
        }
    }

    pub fn is_broadcast(self) -> bool {
        self.contains(Self::BROADCAST)
    }

    pub fn is_redirect(self) -> bool {
        self.contains(Self::REDIRECT)
    }
}

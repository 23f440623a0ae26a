/// Guild Engine — Claim Grid
///
/// One claim per 32×32 cell. Each claim keeps one border bit per edge;
/// a bit is set when the edge faces an unclaimed cell or a cell owned by
/// another guild. Bits are per claim, never shared between neighbours.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::domain::GuildId;
use crate::error::GuildError;

/// World blocks per grid cell edge.
pub const CELL_SIZE: i32 = 32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BorderFlags: u8 {
        const NORTH = 1 << 0;
        const EAST = 1 << 1;
        const SOUTH = 1 << 2;
        const WEST = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// North is -z, East is +x.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    pub fn flag(self) -> BorderFlags {
        match self {
            Direction::North => BorderFlags::NORTH,
            Direction::East => BorderFlags::EAST,
            Direction::South => BorderFlags::SOUTH,
            Direction::West => BorderFlags::WEST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPos2d {
    pub x: i32,
    pub z: i32,
}

impl GridPos2d {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Cell containing a world block column (floor division).
    pub fn from_block(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(CELL_SIZE),
            z: block_z.div_euclid(CELL_SIZE),
        }
    }

    /// Neighbouring cell, or `None` past the edge of the grid.
    pub fn step(self, dir: Direction) -> Option<GridPos2d> {
        let (dx, dz) = dir.offset();
        Some(GridPos2d::new(self.x.checked_add(dx)?, self.z.checked_add(dz)?))
    }

    /// Off-grid neighbours come back as `None` and count as unclaimed.
    pub fn adjacents(self) -> [(Direction, Option<GridPos2d>); 4] {
        Direction::ALL.map(|d| (d, self.step(d)))
    }
}

impl fmt::Display for GridPos2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub position: GridPos2d,
    pub guild_id: GuildId,
    pub border_flags: BorderFlags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimGrid {
    claims: BTreeMap<GridPos2d, Claim>,
}

impl ClaimGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a grid from stored claims, keeping their stored border flags.
    /// Fails on the first duplicated position.
    pub fn from_claims(claims: impl IntoIterator<Item = Claim>) -> Result<Self, GuildError> {
        let mut grid = ClaimGrid::new();
        for claim in claims {
            if grid.claims.contains_key(&claim.position) {
                return Err(GuildError::ClaimExists(claim.position));
            }
            grid.claims.insert(claim.position, claim);
        }
        Ok(grid)
    }

    pub fn try_get_claim(&self, position: GridPos2d) -> Option<&Claim> {
        self.claims.get(&position)
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    pub fn claims_of(&self, guild_id: GuildId) -> impl Iterator<Item = &Claim> {
        self.claims.values().filter(move |c| c.guild_id == guild_id)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn add_claim(&mut self, position: GridPos2d, guild_id: GuildId) -> Result<(), GuildError> {
        if self.claims.contains_key(&position) {
            return Err(GuildError::ClaimExists(position));
        }

        let mut claim = Claim {
            position,
            guild_id,
            border_flags: BorderFlags::empty(),
        };

        for (dir, adjacent) in position.adjacents() {
            match adjacent.and_then(|a| self.claims.get_mut(&a)) {
                Some(neighbor) if neighbor.guild_id == guild_id => {
                    neighbor.border_flags.remove(dir.opposite().flag());
                }
                Some(neighbor) => {
                    claim.border_flags.insert(dir.flag());
                    neighbor.border_flags.insert(dir.opposite().flag());
                }
                None => {
                    claim.border_flags.insert(dir.flag());
                }
            }
        }

        self.claims.insert(position, claim);
        Ok(())
    }

    pub fn remove_claim(&mut self, position: GridPos2d) -> Result<Claim, GuildError> {
        let removed = self
            .claims
            .remove(&position)
            .ok_or(GuildError::ClaimNotFound(position))?;

        for (dir, adjacent) in position.adjacents() {
            if let Some(neighbor) = adjacent.and_then(|a| self.claims.get_mut(&a)) {
                neighbor.border_flags.insert(dir.opposite().flag());
            }
        }

        Ok(removed)
    }

    /// Remove every claim owned by `guild_id`, fixing neighbour borders.
    /// Returns the removed positions in grid order.
    pub fn remove_guild_claims(&mut self, guild_id: GuildId) -> Vec<GridPos2d> {
        let positions: Vec<GridPos2d> = self.claims_of(guild_id).map(|c| c.position).collect();
        for pos in &positions {
            // Present by construction.
            let _ = self.remove_claim(*pos);
        }
        positions
    }

    /// Border flags a claim at `position` owned by `guild_id` should carry
    /// given its current neighbours.
    pub fn expected_borders(&self, position: GridPos2d, guild_id: GuildId) -> BorderFlags {
        let mut flags = BorderFlags::empty();
        for (dir, adjacent) in position.adjacents() {
            match adjacent.and_then(|a| self.claims.get(&a)) {
                Some(neighbor) if neighbor.guild_id == guild_id => {}
                _ => flags.insert(dir.flag()),
            }
        }
        flags
    }

    /// Re-derive every border flag from the position set. Returns the
    /// number of claims whose flags changed.
    pub fn recompute_borders(&mut self) -> usize {
        let expected: Vec<(GridPos2d, BorderFlags)> = self
            .claims
            .values()
            .map(|c| (c.position, self.expected_borders(c.position, c.guild_id)))
            .collect();

        let mut changed = 0;
        for (pos, flags) in expected {
            if let Some(claim) = self.claims.get_mut(&pos) {
                if claim.border_flags != flags {
                    claim.border_flags = flags;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&Claim) -> bool) -> usize {
        let before = self.claims.len();
        self.claims.retain(|_, c| keep(c));
        before - self.claims.len()
    }
}

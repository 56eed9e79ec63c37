//! Phi-web discovery.
//!
//! A phi-web is the set of variables connected through phi instructions. In
//! conventional SSA all members of a web can share one location, so a web
//! owns at most one stack slot and spill code only ever needs the web.
//! Webs are the classes of a union-find (union by rank, path compression)
//! over arguments and locals.

use crate::ir::{Procedure, VarId, WebId};

struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Compress
        let mut x = x;
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.rank[a] > self.rank[b] {
            self.parent[b] = a;
        } else {
            self.parent[a] = b;
            if self.rank[a] == self.rank[b] {
                self.rank[b] += 1;
            }
        }
    }
}

/// Group every argument and local into phi-webs and record each variable's
/// web. Returns the number of webs.
pub fn build_phi_webs(proc: &mut Procedure) -> usize {
    let mut sets = DisjointSets::new(proc.num_vars());
    for block in &proc.blocks {
        for phi in block.phis() {
            for arg in phi.args.iter().flatten() {
                sets.union(phi.dst.index(), arg.index());
            }
        }
    }

    proc.webs.clear();
    let mut root_web: Vec<Option<WebId>> = vec![None; proc.num_vars()];
    let members: Vec<VarId> = proc.args.iter().chain(&proc.locals).copied().collect();
    for var in members {
        let root = sets.find(var.index());
        let web = match root_web[root] {
            Some(web) => web,
            None => {
                let web = proc.new_web();
                root_web[root] = Some(web);
                web
            }
        };
        proc.var_mut(var).web = Some(web);
    }

    log::debug!("phi-web: {} has {} webs", proc.name, proc.webs.len());
    proc.webs.len()
}

//! Reader for the extended-DIMACS ECNF dialect.
//!
//! The format is line based. After the `p ecnf` header every line is one declaration:
//!
//! ```text
//! c comment
//! 1 -2 3 0                        clause
//! D <defid> <head> <body..> 0     disjunctive rule
//! C <defid> <head> <body..> 0     conjunctive rule
//! Impl <E|B|F> <C|D> <head> <body..> 0   reified implication: equivalent, implied-by, implies
//!                                        a conjunctive or disjunctive body
//! Set <id> <lit>.. 0              weighted set with unit weights
//! WSet <id> <lit> <weight>.. 0    weighted set
//! Agg <card|sum|prod|max|min> <E|I|D[defid]> <head> <set> <L|U> <bound>
//! IntRange <id> <lo> <hi>
//! IntLazy <id> <lo> <hi>
//! IntEnum <id> <value>.. 0
//! CmpC <head> <var> <op> <const>          op among = != < <= > >=
//! CmpV <head> <var> <op> <var>
//! LinSum <head> <op> <bound> (<weight> <var>).. 0
//! Prod <head> <factor> <op> <bound> <var>.. 0
//! Elem <index-var> <result-var> <value>.. 0
//! AllDiff <var>.. 0
//! MnmSubset <lit>.. 0
//! MnmList <lit>.. 0
//! MnmAgg <set>
//! ```
//!
//! Literals are signed 1-based integers as in DIMACS; rule heads are positive atom numbers.
use std::io::BufRead;

use anyhow::{anyhow, bail, Context as _};

use ecnfsat::{AggSem, AggSign, AggType, IntCmp, Lit, Solver, Var, Weight, WL};

/// Parse a stream of ECNF declarations into the solver.
pub fn load(input: impl BufRead, solver: &mut Solver) -> anyhow::Result<()> {
    let mut saw_header = false;

    for (line_number, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("line {}: read error", line_number + 1))?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('c') {
            continue;
        }

        if line.starts_with('p') {
            let mut fields = line.split_whitespace();
            fields.next();
            if fields.next() != Some("ecnf") {
                bail!("line {}: expected 'p ecnf' header", line_number + 1);
            }
            saw_header = true;
            continue;
        }

        if !saw_header {
            bail!("line {}: missing 'p ecnf' header", line_number + 1);
        }

        parse_line(line, solver)
            .with_context(|| format!("line {}: malformed declaration", line_number + 1))?;
    }

    Ok(())
}

struct Fields<'a> {
    fields: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str) -> Fields<'a> {
        Fields {
            fields: line.split_whitespace(),
        }
    }

    fn word(&mut self) -> anyhow::Result<&'a str> {
        self.fields.next().ok_or_else(|| anyhow!("missing field"))
    }

    fn int(&mut self) -> anyhow::Result<i64> {
        Ok(self.word()?.parse::<i64>()?)
    }

    fn lit(&mut self) -> anyhow::Result<Lit> {
        let number = self.int()?;
        if number == 0 {
            bail!("unexpected end marker");
        }
        Ok(Lit::from_dimacs(number as isize))
    }

    fn var(&mut self) -> anyhow::Result<Var> {
        let number = self.int()?;
        if number <= 0 {
            bail!("expected a positive atom number");
        }
        Ok(Var::from_dimacs(number as isize))
    }

    fn cmp(&mut self) -> anyhow::Result<IntCmp> {
        Ok(match self.word()? {
            "=" => IntCmp::Eq,
            "!=" => IntCmp::Neq,
            "<" => IntCmp::Lt,
            "<=" => IntCmp::Leq,
            ">" => IntCmp::Gt,
            ">=" => IntCmp::Geq,
            other => bail!("unknown comparison operator {:?}", other),
        })
    }

    /// Remaining integers up to the 0 end marker.
    fn ints_until_zero(&mut self) -> anyhow::Result<Vec<i64>> {
        let mut out = vec![];
        loop {
            let value = self.int()?;
            if value == 0 {
                return Ok(out);
            }
            out.push(value);
        }
    }

    fn lits_until_zero(&mut self) -> anyhow::Result<Vec<Lit>> {
        Ok(self
            .ints_until_zero()?
            .into_iter()
            .map(|number| Lit::from_dimacs(number as isize))
            .collect())
    }

    fn done(&mut self) -> anyhow::Result<()> {
        match self.fields.next() {
            None => Ok(()),
            Some(extra) => bail!("trailing field {:?}", extra),
        }
    }
}

fn parse_line(line: &str, solver: &mut Solver) -> anyhow::Result<()> {
    let mut fields = Fields::new(line);

    let first = fields.word()?;

    match first {
        "D" | "C" => {
            let def_id = fields.int()? as usize;
            let head = fields.var()?;
            let body = fields.lits_until_zero()?;
            fields.done()?;
            solver.add_rule(first == "C", head, &body, def_id)?;
        }
        "Impl" => {
            let kind = match fields.word()? {
                "E" => ecnfsat::ImplicationKind::Equivalent,
                "B" => ecnfsat::ImplicationKind::ImpliedBy,
                "F" => ecnfsat::ImplicationKind::Implies,
                other => bail!("unknown implication kind {:?}", other),
            };
            let conjunctive = match fields.word()? {
                "C" => true,
                "D" => false,
                other => bail!("unknown body connective {:?}", other),
            };
            let head = fields.lit()?;
            let body = fields.lits_until_zero()?;
            fields.done()?;
            solver.add_implication(head, kind, &body, conjunctive)?;
        }
        "Set" => {
            let id = fields.int()? as usize;
            let wls: Vec<WL> = fields
                .lits_until_zero()?
                .into_iter()
                .map(|lit| WL { lit, weight: 1 })
                .collect();
            fields.done()?;
            solver.add_weighted_set(id, AggType::Card, &wls)?;
        }
        "WSet" => {
            let id = fields.int()? as usize;
            let numbers = fields.ints_until_zero()?;
            fields.done()?;
            if numbers.len() % 2 != 0 {
                bail!("weighted set needs literal and weight pairs");
            }
            let wls: Vec<WL> = numbers
                .chunks_exact(2)
                .map(|pair| WL {
                    lit: Lit::from_dimacs(pair[0] as isize),
                    weight: pair[1] as Weight,
                })
                .collect();
            solver.add_weighted_set(id, AggType::Sum, &wls)?;
        }
        "Agg" => {
            let ty = match fields.word()? {
                "card" => AggType::Card,
                "sum" => AggType::Sum,
                "prod" => AggType::Prod,
                "max" => AggType::Max,
                "min" => AggType::Min,
                other => bail!("unknown aggregate type {:?}", other),
            };
            let sem_word = fields.word()?;
            let (sem, def_id) = match sem_word {
                "E" => (AggSem::Equivalence, None),
                "I" => (AggSem::Implication, None),
                _ if sem_word.starts_with('D') => {
                    let def_id = if sem_word.len() > 1 {
                        sem_word[1..].parse::<usize>()?
                    } else {
                        0
                    };
                    (AggSem::Defined, Some(def_id))
                }
                other => bail!("unknown aggregate semantics {:?}", other),
            };
            let head = fields.lit()?;
            let set = fields.int()? as usize;
            let sign = match fields.word()? {
                "L" => AggSign::Lower,
                "U" => AggSign::Upper,
                other => bail!("unknown aggregate sign {:?}", other),
            };
            let bound = fields.int()?;
            fields.done()?;
            solver.add_aggregate(set, head, bound, sign, sem, def_id)?;
        }
        "IntRange" | "IntLazy" => {
            let id = fields.int()? as usize;
            let lo = fields.int()?;
            let hi = fields.int()?;
            fields.done()?;
            solver.add_int_range(id, lo, hi, first == "IntLazy")?;
        }
        "IntEnum" => {
            let id = fields.int()? as usize;
            let values = fields.ints_until_zero()?;
            fields.done()?;
            solver.add_int_enum(id, &values)?;
        }
        "CmpC" => {
            let head = fields.lit()?;
            let var = fields.int()? as usize;
            let cmp = fields.cmp()?;
            let constant = fields.int()?;
            fields.done()?;
            solver.add_int_const_cmp(head, var, cmp, constant)?;
        }
        "CmpV" => {
            let head = fields.lit()?;
            let x = fields.int()? as usize;
            let cmp = fields.cmp()?;
            let y = fields.int()? as usize;
            fields.done()?;
            solver.add_int_binary(
                head,
                ecnfsat::IntView { var: x, offset: 0 },
                cmp,
                ecnfsat::IntView { var: y, offset: 0 },
            )?;
        }
        "LinSum" => {
            let head = fields.lit()?;
            let cmp = fields.cmp()?;
            let bound = fields.int()?;
            let numbers = fields.ints_until_zero()?;
            fields.done()?;
            if numbers.len() % 2 != 0 {
                bail!("weighted sum needs weight and variable pairs");
            }
            let terms: Vec<(Weight, usize)> = numbers
                .chunks_exact(2)
                .map(|pair| (pair[0] as Weight, pair[1] as usize))
                .collect();
            solver.add_int_linear(head, &terms, cmp, bound)?;
        }
        "Prod" => {
            let head = fields.lit()?;
            let factor = fields.int()?;
            let cmp = fields.cmp()?;
            let bound = fields.int()?;
            let vars: Vec<usize> = fields
                .ints_until_zero()?
                .into_iter()
                .map(|v| v as usize)
                .collect();
            fields.done()?;
            solver.add_int_product(head, factor, &vars, cmp, bound)?;
        }
        "Elem" => {
            let index_var = fields.int()? as usize;
            let result_var = fields.int()? as usize;
            let values = fields.ints_until_zero()?;
            fields.done()?;
            solver.add_int_element(index_var, &values, result_var)?;
        }
        "AllDiff" => {
            let vars: Vec<usize> = fields
                .ints_until_zero()?
                .into_iter()
                .map(|v| v as usize)
                .collect();
            fields.done()?;
            solver.add_all_different(&vars)?;
        }
        "MnmSubset" => {
            let lits = fields.lits_until_zero()?;
            fields.done()?;
            solver.minimize_subset(&lits)?;
        }
        "MnmList" => {
            let lits = fields.lits_until_zero()?;
            fields.done()?;
            solver.minimize_ordered(&lits)?;
        }
        "MnmAgg" => {
            let set = fields.int()? as usize;
            fields.done()?;
            solver.minimize_agg_sum(set)?;
        }
        _ => {
            // A plain clause line.
            let number = first
                .parse::<i64>()
                .map_err(|_| anyhow!("unknown declaration {:?}", first))?;
            let mut lits = vec![];
            if number != 0 {
                lits.push(Lit::from_dimacs(number as isize));
                lits.extend(fields.lits_until_zero()?);
            }
            fields.done()?;
            solver.add_clause(&lits)?;
        }
    }

    Ok(())
}

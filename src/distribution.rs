use std::ops::RangeInclusive;

use anyhow::Result;
use rand::distributions::Distribution as RandDistribution;
use rand_distr::{Exp, Uniform};
use rand_pcg::Pcg64Mcg;

pub type RngGen = Pcg64Mcg;

/// Per-worker state threaded through latency sampling.
pub struct DistributionContext {
    gen: RngGen,
}

impl DistributionContext {
    pub fn new(gen: RngGen) -> Self {
        DistributionContext { gen }
    }

    /// A context whose stream depends only on `worker`, so runs repeat.
    pub fn for_worker(worker: u64) -> Self {
        Self::new(RngGen::new(0xcafe_f00d_d15e_a5e5 ^ (u128::from(worker) << 64 | 1)))
    }

    pub fn get_gen_mut(&mut self) -> &mut RngGen {
        &mut self.gen
    }
}

/// Source of synthetic latencies, in microseconds.
pub trait Distribution: Send + Sync {
    fn get_u64(&self, ctx: &mut DistributionContext) -> u64;
}

pub struct FixedDistribution(pub u64);

impl Distribution for FixedDistribution {
    fn get_u64(&self, _ctx: &mut DistributionContext) -> u64 {
        self.0
    }
}

pub struct UniformDistribution(pub Uniform<u64>);

impl Distribution for UniformDistribution {
    fn get_u64(&self, ctx: &mut DistributionContext) -> u64 {
        self.0.sample(ctx.get_gen_mut())
    }
}

/// Exponentially distributed latencies with the given mean.
pub struct ExponentialDistribution(pub Exp<f64>);

impl Distribution for ExponentialDistribution {
    fn get_u64(&self, ctx: &mut DistributionContext) -> u64 {
        self.0.sample(ctx.get_gen_mut()).round() as u64
    }
}

// Parses "fixed:N", "uniform:A..B" or "exp:MEAN"; "name(args)" works too.
// Numbers accept k/m/b suffixes.
pub fn parse_distribution(s: &str) -> Result<Box<dyn Distribution>> {
    let s = s.trim();
    let (dist_s, arg) = if let Some(left_paren) = s.find('(') {
        anyhow::ensure!(
            s.ends_with(')'),
            "Missing closing parenthesis ')' for the distribution parameter"
        );
        (&s[..left_paren], &s[left_paren + 1..s.len() - 1])
    } else if let Some(colon) = s.find(':') {
        (&s[..colon], &s[colon + 1..])
    } else {
        return Err(anyhow::anyhow!("Missing distribution parameter in {:?}", s));
    };

    match dist_s.trim().to_lowercase().as_str() {
        "fixed" => Ok(Box::new(FixedDistribution(parse_number(arg)?))),
        "uniform" => {
            let range = parse_range(arg)?;
            anyhow::ensure!(
                range.start() <= range.end(),
                "Empty range for the uniform distribution: {:?}",
                range
            );
            Ok(Box::new(UniformDistribution(Uniform::new_inclusive(
                range.start(),
                range.end(),
            ))))
        }
        "exp" => {
            let mean = parse_number(arg)?;
            anyhow::ensure!(mean > 0, "The exponential distribution needs a positive mean");
            let exp = Exp::new(1.0 / mean as f64)?;
            Ok(Box::new(ExponentialDistribution(exp)))
        }
        other => Err(anyhow::anyhow!("Unknown distribution: {:?}", other)),
    }
}

fn parse_range(s: &str) -> Result<RangeInclusive<u64>> {
    match s.split_once("..") {
        Some((left, right)) => Ok(parse_number(left)?..=parse_number(right)?),
        None => Err(anyhow::anyhow!(
            "The distribution parameter is missing the '..' separator"
        )),
    }
}

fn parse_number(s: &str) -> Result<u64> {
    let s = s.trim();
    let mult = match s.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('b') => 1_000_000_000,
        Some('m') => 1_000_000,
        Some('k') => 1_000,
        _ => return Ok(s.parse()?),
    };
    let num: u64 = s[..s.len() - 1].parse()?;
    num.checked_mul(mult)
        .ok_or_else(|| anyhow::anyhow!("Number out of range: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("17").unwrap(), 17);
        assert_eq!(parse_number(" 5k").unwrap(), 5_000);
        assert_eq!(parse_number("2M").unwrap(), 2_000_000);
        assert!(parse_number("x").is_err());
        assert!(parse_number("99999999999b").is_err());
    }

    #[test]
    fn test_fixed() {
        let dist = parse_distribution("fixed:250").unwrap();
        let mut ctx = DistributionContext::for_worker(0);
        assert_eq!(dist.get_u64(&mut ctx), 250);

        let dist = parse_distribution("fixed(1k)").unwrap();
        assert_eq!(dist.get_u64(&mut ctx), 1_000);
    }

    #[test]
    fn test_uniform_stays_in_range() {
        let dist = parse_distribution("uniform:10..20").unwrap();
        let mut ctx = DistributionContext::for_worker(3);
        for _ in 0..1000 {
            let v = dist.get_u64(&mut ctx);
            assert!((10..=20).contains(&v));
        }
    }

    #[test]
    fn test_exponential_mean() {
        let dist = parse_distribution("exp:1k").unwrap();
        let mut ctx = DistributionContext::for_worker(7);
        let n = 100_000;
        let sum: u64 = (0..n).map(|_| dist.get_u64(&mut ctx)).sum();
        let mean = sum as f64 / n as f64;
        assert!((mean - 1000.0).abs() < 50.0, "mean {}", mean);
    }

    #[test]
    fn test_invalid() {
        assert!(parse_distribution("fixed").is_err());
        assert!(parse_distribution("uniform:10").is_err());
        assert!(parse_distribution("uniform:20..10").is_err());
        assert!(parse_distribution("exp:0").is_err());
        assert!(parse_distribution("zipf:3").is_err());
        assert!(parse_distribution("fixed(3").is_err());
    }
}

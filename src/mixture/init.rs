use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::Rng;

const LLOYD_MAX_ITER: usize = 20;

/// Hard clustering used to seed EM.
pub(crate) struct KMeansInit {
    pub centers: Vec<DVector<f64>>,
    pub labels: Vec<usize>,
}

/// k-means++ seeding followed by Lloyd iterations. Deterministic for a given
/// `rng` state; needs `samples.len() >= k >= 1`.
pub(crate) fn kmeans(samples: &[DVector<f64>], k: usize, rng: &mut StdRng) -> KMeansInit {
    let mut centers = kmeans_plus_plus(samples, k, rng);
    let mut labels = assign(samples, &centers);
    let dim = samples[0].len();

    for _ in 0..LLOYD_MAX_ITER {
        let mut sums = vec![DVector::zeros(dim); k];
        let mut counts = vec![0usize; k];
        for (x, &label) in samples.iter().zip(labels.iter()) {
            sums[label] += x;
            counts[label] += 1;
        }
        for ((center, sum), &count) in centers.iter_mut().zip(sums).zip(counts.iter()) {
            // an emptied cluster keeps its previous center
            if count > 0 {
                *center = sum / count as f64;
            }
        }

        let next = assign(samples, &centers);
        if next == labels {
            break;
        }
        labels = next;
    }

    KMeansInit { centers, labels }
}

fn kmeans_plus_plus(samples: &[DVector<f64>], k: usize, rng: &mut StdRng) -> Vec<DVector<f64>> {
    let n = samples.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(samples[rng.gen_range(0..n)].clone());

    let mut nearest: Vec<f64> = samples
        .iter()
        .map(|x| (x - &centers[0]).norm_squared())
        .collect();

    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        let pick = if total > 0.0 && total.is_finite() {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in nearest.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };

        let center = samples[pick].clone();
        for (d, x) in nearest.iter_mut().zip(samples) {
            *d = d.min((x - &center).norm_squared());
        }
        centers.push(center);
    }
    centers
}

fn assign(samples: &[DVector<f64>], centers: &[DVector<f64>]) -> Vec<usize> {
    samples
        .iter()
        .map(|x| {
            let mut best = 0usize;
            let mut best_d = f64::INFINITY;
            for (k, c) in centers.iter().enumerate() {
                let d = (x - c).norm_squared();
                if d < best_d {
                    best_d = d;
                    best = k;
                }
            }
            best
        })
        .collect()
}

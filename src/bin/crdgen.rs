use buffer_drain_operator::crd::BufferPool;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&BufferPool::crd())?);
    Ok(())
}

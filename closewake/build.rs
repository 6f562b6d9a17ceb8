fn main() {
  cfg_aliases::cfg_aliases! {
      linux_like: { any(target_os = "linux", target_os = "android") },
  }
}
